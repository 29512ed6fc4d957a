//! In-memory connector that records traffic instead of opening sockets.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::info;

use super::{CommandChannel, Connector, Instrument, InstrumentEndpoint};
use crate::error::{FmError, FmResult};

/// One observable step on a recorded channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connect(Instrument),
    Send(Instrument, String),
    Close(Instrument),
}

/// Failure injected into a [`RecordingConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every connection attempt to the instrument fails.
    RefuseConnection(Instrument),
    /// The instrument accepts `successes` connections, then refuses every later one.
    RefuseConnectionAfter {
        instrument: Instrument,
        successes: usize,
    },
    /// The instrument rejects this exact command (after it is recorded as sent).
    RejectCommand {
        instrument: Instrument,
        command: String,
    },
}

/// Connector that appends every connect, send and close to a shared log.
///
/// Clones share the same log, so a test can keep one handle while the
/// sequencer owns another.
///
/// ```
/// use fmlolc::channel::{ChannelEvent, Instrument, RecordingConnector};
/// use fmlolc::{FmConfig, FmSequencer};
///
/// let recorder = RecordingConnector::new();
/// let mut seq = FmSequencer::new(FmConfig::default(), recorder.clone());
/// seq.finalize()?;
/// assert_eq!(recorder.events()[0], ChannelEvent::Connect(Instrument::Spectrometer));
/// # Ok::<(), fmlolc::FmError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    log: Rc<RefCell<Vec<ChannelEvent>>>,
    faults: Rc<RefCell<Vec<Fault>>>,
    accepted: Rc<RefCell<HashMap<Instrument, usize>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fault; applies to all clones.
    pub fn inject(&self, fault: Fault) {
        self.faults.borrow_mut().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.borrow_mut().clear();
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.log.borrow().clone()
    }

    /// Commands sent to one instrument, in order.
    pub fn commands_for(&self, instrument: Instrument) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ChannelEvent::Send(i, cmd) if *i == instrument => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// All commands sent, tagged with their instrument.
    pub fn sent(&self) -> Vec<(Instrument, String)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ChannelEvent::Send(i, cmd) => Some((*i, cmd.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Connector for RecordingConnector {
    fn connect(
        &self,
        instrument: Instrument,
        endpoint: &InstrumentEndpoint,
    ) -> FmResult<Box<dyn CommandChannel>> {
        let accepted = self
            .accepted
            .borrow()
            .get(&instrument)
            .copied()
            .unwrap_or(0);
        let refused = self.faults.borrow().iter().any(|fault| match fault {
            Fault::RefuseConnection(i) => *i == instrument,
            Fault::RefuseConnectionAfter {
                instrument: i,
                successes,
            } => *i == instrument && accepted >= *successes,
            Fault::RejectCommand { .. } => false,
        });
        if refused {
            return Err(FmError::Connection {
                instrument,
                reason: format!("connection to {} refused (injected)", endpoint.address()),
            });
        }

        *self.accepted.borrow_mut().entry(instrument).or_insert(0) += 1;
        self.log.borrow_mut().push(ChannelEvent::Connect(instrument));
        Ok(Box::new(RecordingChannel {
            instrument,
            prefix: endpoint.prefix.clone(),
            log: Rc::clone(&self.log),
            faults: Rc::clone(&self.faults),
        }))
    }
}

struct RecordingChannel {
    instrument: Instrument,
    prefix: String,
    log: Rc<RefCell<Vec<ChannelEvent>>>,
    faults: Rc<RefCell<Vec<Fault>>>,
}

impl CommandChannel for RecordingChannel {
    fn send(&mut self, command: &str) -> FmResult<()> {
        info!("[dry-run] {} <- {}{}", self.instrument, self.prefix, command);
        self.log
            .borrow_mut()
            .push(ChannelEvent::Send(self.instrument, command.to_string()));

        let rejected = self.faults.borrow().iter().any(|fault| {
            matches!(fault, Fault::RejectCommand { instrument, command: c }
                if *instrument == self.instrument && c == command)
        });
        if rejected {
            return Err(FmError::Command {
                instrument: self.instrument,
                command: command.to_string(),
                reason: "rejected (injected)".to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for RecordingChannel {
    fn drop(&mut self) {
        self.log
            .borrow_mut()
            .push(ChannelEvent::Close(self.instrument));
    }
}
