//! In-memory [`ContainerRuntime`] for exercising the provisioner without a daemon.

use super::runtime::{ContainerRuntime, ContainerSpec, LogStream};
use crate::error::RuntimeError;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageExists(String),
    Pull(String),
    Create(ContainerSpec),
    Start(String),
    Stop(String),
    Remove(String),
    Logs(String),
}

/// Which operation should fail, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Nothing,
    Pull,
    Create,
    Start,
    Stop,
    Remove,
}

pub struct FakeRuntime {
    pub image_present: bool,
    pub fail_on: FailOn,
    /// Log output replayed to `follow_logs`; the stream then stays open.
    pub log_lines: Vec<String>,
    /// The next `stop_container` never completes.
    stall_next_stop: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl FakeRuntime {
    pub const CONTAINER_ID: &'static str = "c0ffee";

    pub fn new() -> Self {
        Self {
            image_present: false,
            fail_on: FailOn::Nothing,
            log_lines: Vec::new(),
            stall_next_stop: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ready_after(mut self, times: usize) -> Self {
        self.log_lines.push("PostgreSQL init process complete".to_string());
        for _ in 0..times {
            self.log_lines
                .push("LOG:  database system is ready to accept connections".to_string());
        }
        self
    }

    pub fn failing_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = fail_on;
        self
    }

    pub fn stalling_next_stop(self) -> Self {
        self.stall_next_stop.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_image_present(mut self) -> Self {
        self.image_present = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_spec(&self) -> Option<ContainerSpec> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Create(spec) => Some(spec),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome(&self, op: FailOn) -> Result<(), RuntimeError> {
        if self.fail_on == op {
            Err(RuntimeError::Other(format!("injected {op:?} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(self.image_present)
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(Call::Pull(image.to_string()));
        self.outcome(FailOn::Pull)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(Call::Create(spec.clone()));
        self.outcome(FailOn::Create)?;
        Ok(Self::CONTAINER_ID.to_string())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Start(id.to_string()));
        self.outcome(FailOn::Start)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Stop(id.to_string()));
        if self.stall_next_stop.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.outcome(FailOn::Stop)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Remove(id.to_string()));
        self.outcome(FailOn::Remove)
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream, RuntimeError> {
        self.record(Call::Logs(id.to_string()));
        let chunks: Vec<Result<Vec<u8>, RuntimeError>> = self
            .log_lines
            .iter()
            .map(|l| Ok(format!("{l}\n").into_bytes()))
            .collect();
        Ok(stream::iter(chunks).chain(stream::pending()).boxed())
    }
}
