// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protobuf messages shared with the system manager, the on-board services
//! and the operator console.
//!
//! The messages are declared by hand with `prost` derives; field tags are the
//! wire contract and must not be renumbered.
//!
//! Tag 3 is unused in `SystemManagerMessage`: its payloads must never decode
//! as a `SensorOutput` carrying a controller output (see [`crate::inbound`]).

/// Identity of an on-board service process.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct ServiceIdentifier {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub pid: i32,
}

/// A named output stream published by a service.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct ServiceEndpoint {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub address: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Service {
    #[prost(message, optional, tag = "1")]
    pub identifier: Option<ServiceIdentifier>,
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<ServiceEndpoint>,
}

/// Snapshot of every service currently registered with the system manager.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceList {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<Service>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NumberParameter {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(float, tag = "2")]
    pub value: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StringParameter {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TuningParameter {
    #[prost(oneof = "tuning_parameter::Parameter", tags = "1, 2")]
    pub parameter: Option<tuning_parameter::Parameter>,
}

pub mod tuning_parameter {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Parameter {
        #[prost(message, tag = "1")]
        Number(super::NumberParameter),
        #[prost(message, tag = "2")]
        String(super::StringParameter),
    }
}

/// The robot's current set of dynamically adjustable parameters.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TuningState {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(message, repeated, tag = "2")]
    pub dynamic_parameters: Vec<TuningParameter>,
}

#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct ServiceListRequest {}

#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct TuningStateRequest {}

/// Envelope for everything exchanged with the system manager, and for the
/// status messages pushed to the console.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SystemManagerMessage {
    #[prost(oneof = "system_manager_message::Msg", tags = "1, 2, 4, 5")]
    pub msg: Option<system_manager_message::Msg>,
}

pub mod system_manager_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "1")]
        ServiceListRequest(super::ServiceListRequest),
        #[prost(message, tag = "2")]
        TuningStateRequest(super::TuningStateRequest),
        #[prost(message, tag = "4")]
        ServiceList(super::ServiceList),
        #[prost(message, tag = "5")]
        TuningState(super::TuningState),
    }
}

impl SystemManagerMessage {
    pub fn service_list_request() -> Self {
        Self {
            msg: Some(system_manager_message::Msg::ServiceListRequest(
                ServiceListRequest {},
            )),
        }
    }

    pub fn tuning_state_request() -> Self {
        Self {
            msg: Some(system_manager_message::Msg::TuningStateRequest(
                TuningStateRequest {},
            )),
        }
    }

    pub fn service_list(list: ServiceList) -> Self {
        Self {
            msg: Some(system_manager_message::Msg::ServiceList(list)),
        }
    }

    pub fn tuning_state(state: TuningState) -> Self {
        Self {
            msg: Some(system_manager_message::Msg::TuningState(state)),
        }
    }
}

/// Envelope wrapping one message read from a service endpoint.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DebugServiceMessage {
    #[prost(message, optional, tag = "1")]
    pub service: Option<ServiceIdentifier>,
    #[prost(message, optional, tag = "2")]
    pub endpoint: Option<ServiceEndpoint>,
    #[prost(bytes = "vec", tag = "3")]
    pub message: Vec<u8>,
    /// Milliseconds since the Unix epoch at wrap time.
    #[prost(int64, tag = "4")]
    pub sent_at: i64,
}

/// Drive command issued from the console.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ControllerOutput {
    #[prost(float, tag = "1")]
    pub steering_angle: f32,
    #[prost(float, tag = "2")]
    pub left_throttle: f32,
    #[prost(float, tag = "3")]
    pub right_throttle: f32,
    #[prost(bool, tag = "4")]
    pub front_lights: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SensorOutput {
    #[prost(uint32, tag = "1")]
    pub sensor_id: u32,
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
    #[prost(oneof = "sensor_output::Output", tags = "3")]
    pub output: Option<sensor_output::Output>,
}

pub mod sensor_output {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Output {
        #[prost(message, tag = "3")]
        ControllerOutput(super::ControllerOutput),
    }
}

/// One chunk of a framed outbound message.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Segment {
    #[prost(int64, tag = "1")]
    pub packet_id: i64,
    #[prost(int64, tag = "2")]
    pub segment_id: i64,
    #[prost(int64, tag = "3")]
    pub total_segments: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}
