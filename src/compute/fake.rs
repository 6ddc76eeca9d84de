// Recording control plane for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    AttachedDisk, AttachedDiskSpec, ComputeApi, Disk, Instance, Location, Operation,
    OperationError, OperationErrorItem, OperationStatus,
};
use crate::error::ClaimError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetDisk(String),
    ListInstances,
    Detach { instance: String, device: String },
    Attach { instance: String, device: String, source: String },
    GetOperation(String),
}

impl Call {
    pub(crate) fn is_mutation(&self) -> bool {
        matches!(self, Call::Detach { .. } | Call::Attach { .. })
    }
}

pub(crate) fn operation(name: &str, status: OperationStatus) -> Operation {
    Operation {
        name: name.to_string(),
        status,
        error: None,
    }
}

pub(crate) fn failed_operation(name: &str) -> Operation {
    Operation {
        name: name.to_string(),
        status: OperationStatus::Done,
        error: Some(OperationError {
            errors: vec![OperationErrorItem {
                code: "RESOURCE_NOT_READY".into(),
                message: "not ready".into(),
            }],
        }),
    }
}

pub(crate) struct FakeCompute {
    disk_exists: bool,
    instances: Vec<Instance>,
    detach_rejected: bool,
    attach_rejected: bool,
    polls: Mutex<HashMap<String, VecDeque<Result<Operation, ClaimError>>>>,
    calls: Mutex<Vec<Call>>,
    issued: Mutex<usize>,
}

impl FakeCompute {
    pub(crate) fn new() -> Self {
        Self {
            disk_exists: true,
            instances: Vec::new(),
            detach_rejected: false,
            attach_rejected: false,
            polls: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            issued: Mutex::new(0),
        }
    }

    pub(crate) fn without_disk(mut self) -> Self {
        self.disk_exists = false;
        self
    }

    pub(crate) fn with_instance(mut self, name: &str, devices: &[&str]) -> Self {
        self.instances.push(Instance {
            name: name.to_string(),
            disks: devices
                .iter()
                .map(|d| AttachedDisk {
                    device_name: d.to_string(),
                    source: None,
                })
                .collect(),
        });
        self
    }

    pub(crate) fn rejecting_detach(mut self) -> Self {
        self.detach_rejected = true;
        self
    }

    pub(crate) fn rejecting_attach(mut self) -> Self {
        self.attach_rejected = true;
        self
    }

    /// Queues the answers `get_operation` gives for `name`, in order. Once
    /// the queue is empty the operation reports DONE.
    pub(crate) fn script(
        self,
        name: &str,
        answers: Vec<Result<Operation, ClaimError>>,
    ) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(name.to_string(), answers.into());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_operation(&self) -> Operation {
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        operation(&format!("op-{}", *issued), OperationStatus::Pending)
    }
}

fn rejected() -> ClaimError {
    ClaimError::Api {
        status: 400,
        message: "rejected".into(),
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn get_disk(&self, location: &Location, disk: &str) -> Result<Disk, ClaimError> {
        self.record(Call::GetDisk(disk.to_string()));
        if !self.disk_exists {
            return Err(ClaimError::DiskNotFound {
                disk: disk.to_string(),
                project: location.project.clone(),
                zone: location.zone.clone(),
            });
        }
        Ok(Disk {
            name: disk.to_string(),
        })
    }

    async fn list_instances(&self, _location: &Location) -> Result<Vec<Instance>, ClaimError> {
        self.record(Call::ListInstances);
        Ok(self.instances.clone())
    }

    async fn detach_disk(
        &self,
        _location: &Location,
        instance: &str,
        device_name: &str,
    ) -> Result<Operation, ClaimError> {
        self.record(Call::Detach {
            instance: instance.to_string(),
            device: device_name.to_string(),
        });
        if self.detach_rejected {
            return Err(rejected());
        }
        Ok(self.next_operation())
    }

    async fn attach_disk(
        &self,
        _location: &Location,
        instance: &str,
        disk: &AttachedDiskSpec,
    ) -> Result<Operation, ClaimError> {
        self.record(Call::Attach {
            instance: instance.to_string(),
            device: disk.device_name.clone(),
            source: disk.source.clone(),
        });
        if self.attach_rejected {
            return Err(rejected());
        }
        Ok(self.next_operation())
    }

    async fn get_operation(
        &self,
        _location: &Location,
        name: &str,
    ) -> Result<Operation, ClaimError> {
        self.record(Call::GetOperation(name.to_string()));
        let scripted = self
            .polls
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(operation(name, OperationStatus::Done)))
    }
}
