//! Core events for in-process listeners

use parkgate_api::{Lane, VehicleSession};

/// Events emitted by the entry and exit pipelines
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A session was opened and the entry gate raised
    EntryRecorded { session: VehicleSession },

    /// A session was closed, the exit gate raised and the exit broadcast
    ExitCompleted { session: VehicleSession },

    /// A pipeline stopped before completion
    PipelineAborted {
        lane: Lane,
        token: String,
        stage: String,
        reason: String,
    },
}
