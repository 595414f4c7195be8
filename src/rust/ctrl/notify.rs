// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::ctrl::{
    seq::SeqNumber,
    SessionId,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Outcome of an outbound connection attempt, delivered to the Tx-application interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenNotification {
    pub session: SessionId,
    pub success: bool,
    pub timed_out: bool,
}

/// Data availability or terminal failure, delivered to the Rx-application interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RxAppNotification {
    pub session: SessionId,
    pub length: u16,
    pub src_addr: u32,
    pub src_port: u16,
    pub closed: bool,
}

/// Tells the Tx-application layer how far its queued data has been acknowledged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AckNotification {
    pub session: SessionId,
    pub acked_up_to: SeqNumber,
    pub init: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl OpenNotification {
    pub fn timed_out(session: SessionId) -> Self {
        Self {
            session,
            success: false,
            timed_out: true,
        }
    }
}

impl RxAppNotification {
    /// The connection was torn down without further data.
    pub fn closed(session: SessionId) -> Self {
        Self {
            session,
            length: 0,
            src_addr: 0,
            src_port: 0,
            closed: true,
        }
    }
}
