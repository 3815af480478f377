//! End-to-end tests of the execution handle over in-memory runtimes.
//!
//! These tests drive the public API only:
//! 1. containerd: create through a container creator, run, wait, clean up
//! 2. containerd: teardown on kill and on failed starts
//! 3. docker: the same contract over a scripted engine
//! 4. stats over a containerd listing

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boxexec_common::config::{Config, RuntimeKind};
use boxexec_common::constants::{DEADLINE_LABEL, OWNER_LABEL};
use boxexec_common::error::{BoxexecError, Result};
use boxexec_common::types::{CommandDetails, ContainerId, Mount};
use boxexec_runtime::backend::containerd::{
    ContainerCreator, Containerd, ContainerdExecution, CreateTaskOptions,
};
use boxexec_runtime::backend::docker::{CreateContainerOptions, DockerClient};
use boxexec_runtime::backend::{Backend, RuntimeClient};
use boxexec_runtime::client::{
    ContainerSpec, ContainerdClient, ExitStatus, LabelFilter, Lease, ProcessSpec,
    RuntimeContainer, RuntimeProcess, RuntimeTask, Scope, TaskStatus,
};
use boxexec_runtime::command::Command;
use boxexec_runtime::stats;
use boxexec_runtime::stdio::TaskIo;
use boxexec_runtime::trace::noop;

// ── In-memory containerd ─────────────────────────────────────────────

#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn log(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct Process {
    journal: Arc<Journal>,
    exit: Mutex<Option<(Sender<ExitStatus>, Receiver<ExitStatus>)>>,
    held: Mutex<Option<Sender<ExitStatus>>>,
    exit_code: Option<u32>,
}

impl RuntimeProcess for Process {
    fn wait(&self) -> Result<Receiver<ExitStatus>> {
        self.journal.log("process.wait");
        let (tx, rx) = self.exit.lock().unwrap().take().expect("wait called once");
        if let Some(code) = self.exit_code {
            tx.send(ExitStatus::new(code)).unwrap();
        } else {
            // never exits: the channel stays open with no status
            *self.held.lock().unwrap() = Some(tx);
        }
        Ok(rx)
    }

    fn start(&self) -> Result<()> {
        self.journal.log("process.start");
        Ok(())
    }
}

struct Task {
    journal: Arc<Journal>,
    exit_code: Option<u32>,
    exec_fails: bool,
}

impl RuntimeTask for Task {
    fn exec(&self, exec_id: &str, spec: &ProcessSpec, _io: TaskIo) -> Result<Arc<dyn RuntimeProcess>> {
        self.journal.log(format!(
            "task.exec {exec_id} uid={} cwd={} args={}",
            spec.user.uid,
            spec.cwd,
            spec.args.join(" ")
        ));
        if self.exec_fails {
            return Err(BoxexecError::Runtime {
                message: "exec refused".into(),
            });
        }
        Ok(Arc::new(Process {
            journal: Arc::clone(&self.journal),
            exit: Mutex::new(Some(mpsc::channel())),
            held: Mutex::new(None),
            exit_code: self.exit_code,
        }))
    }

    fn status(&self) -> Result<TaskStatus> {
        Ok(TaskStatus::Running)
    }

    fn delete(&self) -> Result<()> {
        self.journal.log("task.delete");
        Ok(())
    }
}

struct Container {
    id: String,
    labels: HashMap<String, String>,
    journal: Arc<Journal>,
    exit_code: Option<u32>,
    exec_fails: bool,
}

impl RuntimeContainer for Container {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn labels(&self) -> Result<HashMap<String, String>> {
        Ok(self.labels.clone())
    }

    fn task(&self) -> Result<Arc<dyn RuntimeTask>> {
        Err(BoxexecError::NotFound {
            kind: "task",
            id: self.id.clone(),
        })
    }

    fn new_task(&self) -> Result<Arc<dyn RuntimeTask>> {
        self.journal.log("container.new_task");
        Ok(Arc::new(Task {
            journal: Arc::clone(&self.journal),
            exit_code: self.exit_code,
            exec_fails: self.exec_fails,
        }))
    }

    fn spec(&self) -> Result<ContainerSpec> {
        Ok(ContainerSpec {
            process: Some(ProcessSpec {
                args: vec!["sh".into()],
                ..ProcessSpec::default()
            }),
            ..ContainerSpec::default()
        })
    }

    fn delete(&self) -> Result<()> {
        self.journal.log("container.delete");
        Err(BoxexecError::NotFound {
            kind: "container",
            id: self.id.clone(),
        })
    }
}

struct Daemon {
    journal: Arc<Journal>,
    exit_code: Option<u32>,
    exec_fails: bool,
    listed: Vec<HashMap<String, String>>,
}

impl Daemon {
    fn exiting(code: u32) -> Self {
        Self {
            journal: Arc::default(),
            exit_code: Some(code),
            exec_fails: false,
            listed: Vec::new(),
        }
    }

    fn container(&self, id: &str, labels: HashMap<String, String>) -> Container {
        Container {
            id: id.to_string(),
            labels,
            journal: Arc::clone(&self.journal),
            exit_code: self.exit_code,
            exec_fails: self.exec_fails,
        }
    }
}

impl ContainerdClient for Daemon {
    fn default_namespace(&self) -> &str {
        "default"
    }

    fn create_lease(&self, namespace: &str, expiration: Duration) -> Result<Lease> {
        self.journal.log(format!("lease.create {namespace}"));
        Ok(Lease {
            id: "l1".into(),
            expiration,
        })
    }

    fn delete_lease(&self, _namespace: &str, lease: &Lease) -> Result<()> {
        self.journal.log(format!("lease.delete {}", lease.id));
        Ok(())
    }

    fn is_serving(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn reconnect(&self) -> Result<()> {
        self.journal.log("reconnect");
        Ok(())
    }

    fn load_container(&self, scope: &Scope, id: &str) -> Result<Arc<dyn RuntimeContainer>> {
        self.journal
            .log(format!("container.load {id} lease={}", scope.lease.as_deref().unwrap_or("-")));
        Ok(Arc::new(self.container(id, HashMap::new())))
    }

    fn containers(&self, scope: &Scope, filter: &LabelFilter) -> Result<Vec<Arc<dyn RuntimeContainer>>> {
        self.journal.log(format!("containers {} {filter}", scope.namespace));
        Ok(self
            .listed
            .iter()
            .enumerate()
            .map(|(i, labels)| -> Arc<dyn RuntimeContainer> {
                Arc::new(self.container(&format!("c{i}"), labels.clone()))
            })
            .collect())
    }
}

struct Creator {
    journal: Arc<Journal>,
}

impl ContainerCreator for Creator {
    fn create_container(&self, args: &[String]) -> Result<String> {
        self.journal.log(format!("nerdctl {}", args.join(" ")));
        Ok("ctr-1".into())
    }

    fn remove_container(&self, namespace: &str, id: &str) -> Result<()> {
        self.journal.log(format!("nerdctl rm {namespace} {id}"));
        Ok(())
    }
}

fn task_options(timeout: Duration) -> CreateTaskOptions {
    CreateTaskOptions {
        image: "docker-agent:latest".into(),
        user: "61000".into(),
        env: vec!["A=B".into()],
        command_timeout: timeout,
        working_dir: "/go/src".into(),
        command_details: CommandDetails {
            executor_id: 2,
            chain_executor_id: 1,
            result_id: 3,
        },
        ..CreateTaskOptions::default()
    }
}

fn containerd_command(daemon: &Arc<Daemon>, opts: CreateTaskOptions) -> Command {
    let runtime = Containerd::new(Arc::clone(daemon) as Arc<dyn ContainerdClient>, "k8s.io")
        .expect("namespace is set");
    let creator = Arc::new(Creator {
        journal: Arc::clone(&daemon.journal),
    });
    let execution = ContainerdExecution::with_creator(runtime, opts, creator, noop());
    Command::new(
        Backend::Containerd(execution),
        "java",
        vec!["-jar".into(), "data-prep-cli.jar".into()],
    )
}

// ── containerd ───────────────────────────────────────────────────────

#[test]
fn containerd_run_follows_full_lifecycle() {
    let daemon = Arc::new(Daemon::exiting(0));
    let mut cmd = containerd_command(&daemon, task_options(Duration::from_secs(60)));

    let outcome = cmd.run(TaskIo::null());
    assert!(outcome.success(), "unexpected outcome: {outcome:?}");
    assert_eq!(cmd.container_id(), Some(ContainerId::new("ctr-1")));

    let entries = daemon.journal.entries();
    let steps: Vec<&str> = entries
        .iter()
        .map(|e| e.split_whitespace().next().unwrap_or_default())
        .collect();
    assert_eq!(
        steps,
        vec![
            "lease.create",
            "nerdctl",
            "container.load",
            "container.new_task",
            "task.exec",
            "process.wait",
            "process.start",
            "task.delete",
            "container.delete",
            "lease.delete",
        ]
    );
    assert!(entries[1].starts_with("nerdctl --namespace k8s.io create --name chains-1-2-3-"));
    assert!(entries[1].contains(&format!("--label {OWNER_LABEL}=chains")));
    assert!(entries[1].ends_with(" docker-agent:latest"));
    assert_eq!(entries[2], "container.load ctr-1 lease=l1");
    assert_eq!(
        entries[4],
        "task.exec ctr-1-task uid=61000 cwd=/go/src args=java -jar data-prep-cli.jar"
    );
}

#[test]
fn containerd_exit_code_is_passed_through() {
    let daemon = Arc::new(Daemon::exiting(42));
    let mut cmd = containerd_command(&daemon, task_options(Duration::from_secs(60)));
    let outcome = cmd.run(TaskIo::null());
    assert_eq!(outcome.code, 42);
    assert!(outcome.error.is_none());
}

#[test]
fn containerd_kill_tears_down_once() {
    let daemon = Arc::new(Daemon {
        exit_code: None,
        ..Daemon::exiting(0)
    });
    let mut cmd = containerd_command(&daemon, task_options(Duration::ZERO));
    cmd.start(TaskIo::null()).expect("start succeeds");

    cmd.kill().expect("kill succeeds");
    cmd.kill().expect("second kill is a no-op");
    let deletes = daemon
        .journal
        .entries()
        .iter()
        .filter(|e| *e == "task.delete")
        .count();
    assert_eq!(deletes, 1);
}

#[test]
fn containerd_failed_exec_removes_container() {
    let daemon = Arc::new(Daemon {
        exec_fails: true,
        ..Daemon::exiting(0)
    });
    let mut cmd = containerd_command(&daemon, task_options(Duration::from_secs(60)));

    let err = cmd.start(TaskIo::null()).unwrap_err();
    assert!(err.to_string().contains("exec refused"));
    let entries = daemon.journal.entries();
    assert!(entries.contains(&"container.delete".to_string()));
    assert_eq!(entries.last().map(String::as_str), Some("lease.delete l1"));
}

#[test]
fn containerd_settings_reject_second_value() {
    let daemon = Arc::new(Daemon::exiting(0));
    let mut cmd = containerd_command(&daemon, task_options(Duration::from_secs(60)));
    let err = cmd.set_env(vec!["X=1".into()]).unwrap_err();
    assert_eq!(err.to_string(), "boxexec: Config.Env already set");
}

#[test]
fn missing_namespace_fails_construction() {
    let daemon: Arc<dyn ContainerdClient> = Arc::new(Daemon::exiting(0));
    let err = Command::from_config(RuntimeClient::Containerd(daemon), &Config::default())
        .err()
        .expect("namespace is required");
    assert!(matches!(err, BoxexecError::Config { .. }));
}

// ── docker ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Engine {
    created: Mutex<Vec<CreateContainerOptions>>,
    removed: Mutex<Vec<ContainerId>>,
}

impl DockerClient for Engine {
    fn create_container(&self, opts: &CreateContainerOptions) -> Result<ContainerId> {
        self.created.lock().unwrap().push(opts.clone());
        Ok(ContainerId::new("d-1"))
    }

    fn start_attached(&self, _id: &ContainerId, _io: TaskIo) -> Result<Receiver<ExitStatus>> {
        let (tx, rx) = mpsc::channel();
        tx.send(ExitStatus::new(5)).unwrap();
        Ok(rx)
    }

    fn remove_container(&self, id: &ContainerId) -> Result<()> {
        self.removed.lock().unwrap().push(id.clone());
        Ok(())
    }
}

#[test]
fn docker_run_applies_configuration() {
    let mut config = Config {
        runtime: RuntimeKind::Docker,
        ..Config::default()
    };
    config.container.image = "alpine:3".into();
    config.container.mounts = vec![Mount {
        mount_type: "bind".into(),
        source: "/cache".into(),
        destination: "/root/.cache".into(),
        options: vec!["rw".into(), "ro".into()],
    }];
    config.network.dns_search = vec!["corp".into()];
    config.task.executable = "make".into();
    config.task.args = vec!["test".into()];

    let engine = Arc::new(Engine::default());
    let client = RuntimeClient::Docker(Arc::clone(&engine) as Arc<dyn DockerClient>);
    let mut cmd = Command::from_config(client, &config).expect("docker backend builds");

    let outcome = cmd.run(TaskIo::null());
    assert_eq!(outcome.code, 5);

    let created = engine.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].cmd, vec!["make", "test"]);
    assert!(created[0].mounts[0].read_only);
    assert_eq!(created[0].dns_search, vec!["corp"]);
    assert!(created[0].labels.contains_key(DEADLINE_LABEL));
    assert_eq!(*engine.removed.lock().unwrap(), vec![ContainerId::new("d-1")]);
}

// ── stats ────────────────────────────────────────────────────────────

#[test]
fn stats_count_overdue_and_running_containers() {
    let overdue = HashMap::from([(DEADLINE_LABEL.to_string(), "2001-01-01T00:00:00Z".to_string())]);
    let daemon = Arc::new(Daemon {
        listed: vec![overdue, HashMap::new()],
        ..Daemon::exiting(0)
    });

    let client = RuntimeClient::Containerd(Arc::clone(&daemon) as Arc<dyn ContainerdClient>);
    let snapshot = stats::get_stats(&client).expect("listing succeeds");
    assert_eq!(snapshot.deadline_exceeded, 1);
    // listed containers have no task, which is not an error
    assert_eq!(snapshot.errors, 0);
    assert_eq!(snapshot.running, 0);
    assert_eq!(
        daemon.journal.entries(),
        vec![r#"containers default labels."wk/owner"==chains"#]
    );
}
