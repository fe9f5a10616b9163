//! JSON-RPC command surface (§6): a typed contract for the handful of
//! control operations this core exposes. Full request routing,
//! authentication and the wire transport are explicitly out of scope;
//! what's grounded here is the command/response shape a transport layer
//! would dispatch against.

use serde::{Deserialize, Serialize};

use crate::instance_manager::InstanceState;
use crate::perf::PerformanceSnapshot;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// `registerInput`/`setInput`/`setInputImage` land on the muxer
    /// directly; these are the instance-lifecycle and reporting commands
    /// a control surface needs on top of that.
    ListInstances,
    StartInstance { index: u32 },
    StopInstance { index: u32 },
    DeleteInstance { index: u32 },
    SelectPriority { index: u32, priority: i32 },
    SelectAuto { index: u32 },
    PerformanceCounters { index: u32 },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InstanceSummary {
    pub index: u32,
    pub name: String,
    pub state: InstanceStateWire,
    pub visible_priority: i32,
}

/// Wire-serializable mirror of [`InstanceState`]; kept distinct so the
/// lifecycle enum's internal representation can evolve without breaking
/// the wire contract.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStateWire {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

impl From<InstanceState> for InstanceStateWire {
    fn from(s: InstanceState) -> Self {
        match s {
            InstanceState::Created => InstanceStateWire::Created,
            InstanceState::Starting => InstanceStateWire::Starting,
            InstanceState::Running => InstanceStateWire::Running,
            InstanceState::Stopping => InstanceStateWire::Stopping,
            InstanceState::Stopped => InstanceStateWire::Stopped,
            InstanceState::Errored => InstanceStateWire::Errored,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Response {
    Ok,
    Instances { instances: Vec<InstanceSummary> },
    Counters { snapshot: PerformanceSnapshot },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_json() {
        let cmd = Command::StartInstance { index: 2 };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Command::StartInstance { index: 2 }));
    }

    #[test]
    fn state_wire_mirrors_every_lifecycle_state() {
        for s in [
            InstanceState::Created,
            InstanceState::Starting,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Stopped,
            InstanceState::Errored,
        ] {
            let _: InstanceStateWire = s.into();
        }
    }
}
