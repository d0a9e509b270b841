//! The supervised companion process: a child spawned from `[supervisor]`
//! and probed over HTTP.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    process::Stdio,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use {
    anyhow::Context,
    async_trait::async_trait,
    tokio::{process::Child, sync::Mutex},
    tracing::{debug, info, warn},
};

use {hunter_config::SupervisorSection, hunter_scheduler::ManagedProcess};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CommandProcess {
    name: String,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    health_url: Option<String>,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
    pid: AtomicU32,
}

impl CommandProcess {
    pub fn from_section(section: &SupervisorSection) -> anyhow::Result<Self> {
        if section.command.trim().is_empty() {
            anyhow::bail!("supervisor.command is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            name: section.name.clone(),
            program: section.command.clone(),
            args: section.args.clone(),
            env: section.env.clone(),
            working_dir: section.working_dir.clone(),
            health_url: Some(section.health_url.trim().to_string()).filter(|u| !u.is_empty()),
            client,
            child: Mutex::new(None),
            pid: AtomicU32::new(0),
        })
    }

    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(process = %self.name, status = %resp.status(), "health probe rejected");
                false
            },
            Err(e) => {
                debug!(process = %self.name, error = %e, "health probe failed");
                false
            },
        }
    }
}

#[async_trait]
impl ManagedProcess for CommandProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut()
            && child.try_wait()?.is_none()
        {
            anyhow::bail!("{} is already running", self.name);
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;
        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        *slot = Some(child);
        info!(process = %self.name, pid, "process spawned");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        self.pid.store(0, Ordering::SeqCst);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.start_kill()?;
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(process = %self.name, %status, "process stopped");
            },
            Err(_) => warn!(process = %self.name, "process did not exit after kill"),
        }
        Ok(())
    }

    async fn check_health(&self) -> bool {
        let alive = {
            let mut slot = self.child.lock().await;
            match slot.as_mut().map(Child::try_wait) {
                Some(Ok(None)) => true,
                Some(Ok(Some(status))) => {
                    warn!(process = %self.name, %status, "process exited");
                    false
                },
                Some(Err(e)) => {
                    warn!(process = %self.name, error = %e, "could not poll process");
                    false
                },
                None => false,
            }
        };
        match (&self.health_url, alive) {
            (_, false) => false,
            (None, true) => true,
            (Some(url), true) => self.probe(url).await,
        }
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid.load(Ordering::SeqCst)).filter(|&pid| pid != 0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Server};

    fn section(health_url: &str) -> SupervisorSection {
        SupervisorSection {
            name: "sleeper".into(),
            command: "sleep".into(),
            args: vec!["30".into()],
            health_url: health_url.into(),
            ..SupervisorSection::default()
        }
    }

    #[tokio::test]
    async fn start_and_stop_track_pid() {
        let process = CommandProcess::from_section(&section("")).unwrap();
        assert!(!process.check_health().await);

        process.start().await.unwrap();
        assert!(process.pid().is_some());
        assert!(process.check_health().await);
        assert!(process.start().await.is_err());

        process.stop().await.unwrap();
        assert!(process.pid().is_none());
        assert!(!process.check_health().await);
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn health_follows_http_probe() {
        let mut server = Server::new_async().await;
        let healthy = server
            .mock("GET", "/health")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let process =
            CommandProcess::from_section(&section(&format!("{}/health", server.url()))).unwrap();
        process.start().await.unwrap();
        assert!(process.check_health().await);
        healthy.assert_async().await;

        healthy.remove_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        assert!(!process.check_health().await);
        process.stop().await.unwrap();
    }

    #[test]
    fn empty_command_is_rejected() {
        let section = SupervisorSection::default();
        assert!(CommandProcess::from_section(&section).is_err());
    }
}
