//! In-memory runtime fakes recording the calls made against them.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boxexec_common::error::{BoxexecError, Result};
use boxexec_common::types::ContainerId;

use crate::backend::containerd::ContainerCreator;
use crate::backend::docker::{CreateContainerOptions, DockerClient};
use crate::client::{
    ContainerSpec, ContainerdClient, ExitStatus, LabelFilter, Lease, ProcessSpec, RuntimeContainer,
    RuntimeProcess, RuntimeTask, Scope, TaskStatus,
};
use crate::stdio::TaskIo;

/// Scripted result of a fake call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Outcome {
    #[default]
    Ok,
    NotFound,
    Fail(&'static str),
}

impl Outcome {
    fn result(self, kind: &'static str, id: &str) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::NotFound => Err(BoxexecError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Self::Fail(message) => Err(BoxexecError::Runtime {
                message: message.to_string(),
            }),
        }
    }
}

/// Call observed on a fake process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Wait,
    Start,
}

pub(crate) struct FakeProcess {
    exits: Mutex<Option<Receiver<ExitStatus>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeProcess {
    pub(crate) fn new(exits: Receiver<ExitStatus>) -> Self {
        Self {
            exits: Mutex::new(Some(exits)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl RuntimeProcess for FakeProcess {
    fn wait(&self) -> Result<Receiver<ExitStatus>> {
        self.calls.lock().unwrap().push(Call::Wait);
        self.exits
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BoxexecError::Runtime {
                message: "wait registered twice".into(),
            })
    }

    fn start(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Start);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeTask {
    pub(crate) process: Option<Arc<FakeProcess>>,
    pub(crate) status: Option<TaskStatus>,
    pub(crate) status_outcome: Outcome,
    pub(crate) delete: Outcome,
    pub(crate) exec_ids: Mutex<Vec<String>>,
    pub(crate) exec_stdin: Mutex<Vec<bool>>,
    pub(crate) deletes: Mutex<usize>,
}

impl FakeTask {
    pub(crate) fn with_process(process: Arc<FakeProcess>) -> Self {
        Self {
            process: Some(process),
            ..Self::default()
        }
    }

    pub(crate) fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub(crate) fn exec_ids(&self) -> Vec<String> {
        self.exec_ids.lock().unwrap().clone()
    }

    pub(crate) fn exec_stdin(&self) -> Vec<bool> {
        self.exec_stdin.lock().unwrap().clone()
    }

    pub(crate) fn deletes(&self) -> usize {
        *self.deletes.lock().unwrap()
    }
}

impl RuntimeTask for FakeTask {
    fn exec(
        &self,
        exec_id: &str,
        _spec: &ProcessSpec,
        io: TaskIo,
    ) -> Result<Arc<dyn RuntimeProcess>> {
        self.exec_ids.lock().unwrap().push(exec_id.to_string());
        self.exec_stdin.lock().unwrap().push(io.stdin.is_some());
        match &self.process {
            Some(p) => Ok(p.clone()),
            None => Err(BoxexecError::Runtime {
                message: "no process scripted".into(),
            }),
        }
    }

    fn status(&self) -> Result<TaskStatus> {
        self.status_outcome.result("task", "fake")?;
        Ok(self.status.clone().unwrap_or(TaskStatus::Running))
    }

    fn delete(&self) -> Result<()> {
        *self.deletes.lock().unwrap() += 1;
        self.delete.result("task", "fake")
    }
}

pub(crate) struct FakeContainer {
    pub(crate) id: String,
    pub(crate) labels: Option<HashMap<String, String>>,
    pub(crate) spec: ContainerSpec,
    pub(crate) task: Option<Arc<FakeTask>>,
    pub(crate) new_task: Option<Arc<FakeTask>>,
    pub(crate) delete: Outcome,
    pub(crate) deletes: Mutex<usize>,
}

impl FakeContainer {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            labels: Some(HashMap::new()),
            spec: ContainerSpec {
                process: Some(ProcessSpec {
                    args: vec!["sh".into()],
                    cwd: "/".into(),
                    ..ProcessSpec::default()
                }),
                ..ContainerSpec::default()
            },
            task: None,
            new_task: None,
            delete: Outcome::Ok,
            deletes: Mutex::new(0),
        }
    }

    pub(crate) fn deletes(&self) -> usize {
        *self.deletes.lock().unwrap()
    }
}

impl RuntimeContainer for FakeContainer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn labels(&self) -> Result<HashMap<String, String>> {
        self.labels.clone().ok_or_else(|| BoxexecError::Runtime {
            message: "labels unavailable".into(),
        })
    }

    fn task(&self) -> Result<Arc<dyn RuntimeTask>> {
        match &self.task {
            Some(t) => Ok(t.clone()),
            None => Err(BoxexecError::NotFound {
                kind: "task",
                id: self.id.clone(),
            }),
        }
    }

    fn new_task(&self) -> Result<Arc<dyn RuntimeTask>> {
        match &self.new_task {
            Some(t) => Ok(t.clone()),
            None => Err(BoxexecError::Runtime {
                message: "no task scripted".into(),
            }),
        }
    }

    fn spec(&self) -> Result<ContainerSpec> {
        Ok(self.spec.clone())
    }

    fn delete(&self) -> Result<()> {
        *self.deletes.lock().unwrap() += 1;
        self.delete.result("container", &self.id)
    }
}

#[derive(Default)]
pub(crate) struct FakeClient {
    containers: Mutex<Vec<Arc<FakeContainer>>>,
    serving: Mutex<VecDeque<std::result::Result<bool, &'static str>>>,
    reconnect_fails: Mutex<bool>,
    reconnects: Mutex<usize>,
    leases_created: Mutex<Vec<Duration>>,
    leases_deleted: Mutex<Vec<String>>,
    loaded_scope: Mutex<Option<Scope>>,
    list_fails: Mutex<bool>,
    filters: Mutex<Vec<(Scope, LabelFilter)>>,
}

impl FakeClient {
    pub(crate) fn add_container(&self, container: FakeContainer) {
        self.containers.lock().unwrap().push(Arc::new(container));
    }

    /// Queues liveness results; once drained the client reports serving.
    pub(crate) fn set_serving(&self, results: Vec<std::result::Result<bool, &'static str>>) {
        *self.serving.lock().unwrap() = results.into();
    }

    pub(crate) fn fail_reconnect(&self) {
        *self.reconnect_fails.lock().unwrap() = true;
    }

    pub(crate) fn fail_listing(&self) {
        *self.list_fails.lock().unwrap() = true;
    }

    pub(crate) fn reconnects(&self) -> usize {
        *self.reconnects.lock().unwrap()
    }

    pub(crate) fn leases_created(&self) -> Vec<Duration> {
        self.leases_created.lock().unwrap().clone()
    }

    pub(crate) fn leases_deleted(&self) -> Vec<String> {
        self.leases_deleted.lock().unwrap().clone()
    }

    pub(crate) fn loaded_scope(&self) -> Option<Scope> {
        self.loaded_scope.lock().unwrap().clone()
    }

    pub(crate) fn filters(&self) -> Vec<(Scope, LabelFilter)> {
        self.filters.lock().unwrap().clone()
    }
}

impl ContainerdClient for FakeClient {
    fn default_namespace(&self) -> &str {
        "default"
    }

    fn create_lease(&self, _namespace: &str, expiration: Duration) -> Result<Lease> {
        let mut created = self.leases_created.lock().unwrap();
        created.push(expiration);
        Ok(Lease {
            id: format!("lease-{}", created.len()),
            expiration,
        })
    }

    fn delete_lease(&self, _namespace: &str, lease: &Lease) -> Result<()> {
        self.leases_deleted.lock().unwrap().push(lease.id.clone());
        Ok(())
    }

    fn is_serving(&self, _timeout: Duration) -> Result<bool> {
        match self.serving.lock().unwrap().pop_front() {
            None => Ok(true),
            Some(Ok(serving)) => Ok(serving),
            Some(Err(message)) => Err(BoxexecError::Transport {
                message: message.to_string(),
            }),
        }
    }

    fn reconnect(&self) -> Result<()> {
        *self.reconnects.lock().unwrap() += 1;
        if *self.reconnect_fails.lock().unwrap() {
            return Err(BoxexecError::Transport {
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn load_container(&self, scope: &Scope, id: &str) -> Result<Arc<dyn RuntimeContainer>> {
        *self.loaded_scope.lock().unwrap() = Some(scope.clone());
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .map(|c| -> Arc<dyn RuntimeContainer> { c.clone() })
            .ok_or_else(|| BoxexecError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    fn containers(
        &self,
        scope: &Scope,
        filter: &LabelFilter,
    ) -> Result<Vec<Arc<dyn RuntimeContainer>>> {
        self.filters
            .lock()
            .unwrap()
            .push((scope.clone(), filter.clone()));
        if *self.list_fails.lock().unwrap() {
            return Err(BoxexecError::Transport {
                message: "listing failed".into(),
            });
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|c| -> Arc<dyn RuntimeContainer> { c.clone() })
            .collect())
    }
}

pub(crate) struct FakeCreator {
    result: std::result::Result<String, &'static str>,
    invocations: Mutex<Vec<Vec<String>>>,
    removals: Mutex<Vec<(String, String)>>,
}

impl FakeCreator {
    pub(crate) fn returning(id: &str) -> Self {
        Self {
            result: Ok(id.to_string()),
            invocations: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(stderr: &'static str) -> Self {
        Self {
            result: Err(stderr),
            invocations: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    pub(crate) fn removals(&self) -> Vec<(String, String)> {
        self.removals.lock().unwrap().clone()
    }
}

impl ContainerCreator for FakeCreator {
    fn create_container(&self, args: &[String]) -> Result<String> {
        self.invocations.lock().unwrap().push(args.to_vec());
        match &self.result {
            Ok(id) => Ok(id.clone()),
            Err(stderr) => Err(BoxexecError::ExternalTool {
                tool: "nerdctl",
                status: "exit status: 1".into(),
                stderr: (*stderr).to_string(),
            }),
        }
    }

    fn remove_container(&self, namespace: &str, id: &str) -> Result<()> {
        self.removals
            .lock()
            .unwrap()
            .push((namespace.to_string(), id.to_string()));
        Ok(())
    }
}

/// Docker client fake; each start hands out the next scripted exit channel.
#[derive(Default)]
pub(crate) struct FakeDocker {
    pub(crate) created: Mutex<Vec<CreateContainerOptions>>,
    pub(crate) exits: Mutex<VecDeque<Receiver<ExitStatus>>>,
    pub(crate) starts: Mutex<usize>,
    pub(crate) removed: Mutex<Vec<String>>,
    pub(crate) remove: Outcome,
    pub(crate) create_fails: bool,
}

impl FakeDocker {
    /// Returns a fake whose next start exits with `code` immediately.
    pub(crate) fn exiting(code: u32) -> Self {
        let fake = Self::default();
        let (tx, rx) = mpsc::channel();
        tx.send(ExitStatus::new(code)).unwrap();
        fake.exits.lock().unwrap().push_back(rx);
        fake
    }

    pub(crate) fn created(&self) -> Vec<CreateContainerOptions> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn starts(&self) -> usize {
        *self.starts.lock().unwrap()
    }
}

impl DockerClient for FakeDocker {
    fn create_container(&self, opts: &CreateContainerOptions) -> Result<ContainerId> {
        self.created.lock().unwrap().push(opts.clone());
        if self.create_fails {
            return Err(BoxexecError::ExternalTool {
                tool: "docker",
                status: "exit status: 125".into(),
                stderr: "pull access denied".into(),
            });
        }
        Ok(ContainerId::new(format!("docker-{}", opts.name)))
    }

    fn start_attached(&self, _id: &ContainerId, _io: TaskIo) -> Result<Receiver<ExitStatus>> {
        *self.starts.lock().unwrap() += 1;
        self.exits
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BoxexecError::Runtime {
                message: "no exit scripted".into(),
            })
    }

    fn remove_container(&self, id: &ContainerId) -> Result<()> {
        self.removed.lock().unwrap().push(id.to_string());
        self.remove.result("container", id.as_str())
    }
}
