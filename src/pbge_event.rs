// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use crate::pbgc_core::RunningApp;
use crate::pbgi_interdict::Interdictor;
use crate::pbgs_state::ComplianceState;
use crate::pbgw_winguard::{self, TerminationReply, WindowControl};

/// Everything the OS can tell the agent, reduced to what enforcement needs.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    SessionLocked,
    SessionUnlocked,
    ActiveSpaceChanged,
    PromptWindowMoved,
    ApplicationHidden,
    ApplicationLaunched(RunningApp),
}

/// Cloneable posting end handed to every OS hook. Posting never blocks; a
/// hub that is already gone just drops the event with a log line.
#[derive(Clone)]
pub struct EventPoster {
    tx: Sender<AgentEvent>,
}

impl EventPoster {
    pub fn post(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("OBSERVER: event dropped, hub is gone");
        }
    }
}

/// Single-consumer queue between the OS hooks and the engine. Arrival order
/// is dispatch order.
pub struct EventHub {
    tx: Sender<AgentEvent>,
    rx: Receiver<AgentEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn poster(&self) -> EventPoster {
        EventPoster {
            tx: self.tx.clone(),
        }
    }

    fn try_recv(&self) -> Result<AgentEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// The one consumer of the hub and the facade the platform layer calls
/// into. All handlers are quick; anything slow leaves through the
/// interdictor's scheduler.
pub struct Engine {
    hub: EventHub,
    state: Arc<ComplianceState>,
    interdictor: Interdictor,
    window: Box<dyn WindowControl>,
}

impl Engine {
    pub fn new(
        hub: EventHub,
        state: Arc<ComplianceState>,
        interdictor: Interdictor,
        window: Box<dyn WindowControl>,
    ) -> Self {
        Self {
            hub,
            state,
            interdictor,
            window,
        }
    }

    pub fn poster(&self) -> EventPoster {
        self.hub.poster()
    }

    /// Launch-complete hook: arm interdiction, then run the one-time
    /// first-launch window policy.
    pub fn startup(&self, fullscreen_active: bool) {
        self.interdictor.arm();
        pbgw_winguard::finish_launch(&self.state, fullscreen_active, self.window.as_ref());
    }

    /// The platform's "may I terminate?" callback lands here.
    pub fn termination_request(&self) -> TerminationReply {
        pbgw_winguard::handle_termination_request(&self.state)
    }

    pub fn handle(&self, event: AgentEvent) {
        match event {
            AgentEvent::SessionLocked => {
                log::info!("OBSERVER: session locked");
            }
            AgentEvent::SessionUnlocked => {
                log::info!("OBSERVER: session unlocked");
            }
            AgentEvent::ActiveSpaceChanged => {
                log::debug!("OBSERVER: active space changed");
                pbgw_winguard::recenter(self.window.as_ref());
                self.state.mark_state_change();
            }
            AgentEvent::PromptWindowMoved => {
                // Centering an already-centered window does not move it, so
                // this route cannot re-post its own trigger.
                log::debug!("OBSERVER: prompt window moved or changed display");
                pbgw_winguard::recenter(self.window.as_ref());
            }
            AgentEvent::ApplicationHidden => {
                log::debug!("OBSERVER: application hidden");
            }
            AgentEvent::ApplicationLaunched(app) => {
                log::debug!("OBSERVER: launched \"{}\" (pid {})", app.bundle_id, app.pid);
                self.interdictor.handle_launch(&app);
            }
        }
    }

    /// Drain everything queued, in order. Driven by a run-loop timer on the
    /// platform side and called directly in tests.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        loop {
            match self.hub.try_recv() {
                Ok(event) => {
                    self.handle(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }
}
