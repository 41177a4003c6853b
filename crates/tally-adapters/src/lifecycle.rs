//! Process lifecycle adapter
//!
//! Turns job-control signals into lifecycle events: SIGTSTP (Ctrl-Z) is the
//! terminal equivalent of the app going to the background, SIGCONT (`fg`)
//! brings it back.

use std::io;
use std::time::Duration;

use tally_core::ports::lifecycle::{LifecycleBroadcaster, LifecycleEvent, LifecycleSignal};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Time subscribers get to observe Background before the process stops
const SUSPEND_SETTLE: Duration = Duration::from_millis(20);

/// Lifecycle signal backed by SIGTSTP / SIGCONT
pub struct SignalLifecycle {
    broadcaster: LifecycleBroadcaster,
    task: JoinHandle<()>,
}

impl SignalLifecycle {
    /// Installs the signal handlers
    ///
    /// Must be called from within a tokio runtime. Once installed, Ctrl-Z no
    /// longer stops the process directly: the handler announces Background,
    /// then stops the process itself.
    pub fn install() -> io::Result<Self> {
        let mut suspend = signal(SignalKind::from_raw(libc::SIGTSTP))?;
        let mut resume = signal(SignalKind::from_raw(libc::SIGCONT))?;

        let broadcaster = LifecycleBroadcaster::new();
        let tx = broadcaster.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = suspend.recv() => {
                        if received.is_none() {
                            break;
                        }
                        debug!("SIGTSTP received");
                        tx.emit(LifecycleEvent::Background);
                        tokio::time::sleep(SUSPEND_SETTLE).await;
                        stop_self();
                    }
                    received = resume.recv() => {
                        if received.is_none() {
                            break;
                        }
                        debug!("SIGCONT received");
                        tx.emit(LifecycleEvent::Foreground);
                    }
                }
            }
            warn!("Signal streams closed, lifecycle events stopped");
        });

        Ok(Self { broadcaster, task })
    }

    /// Underlying broadcaster, for emitting events by hand
    pub fn broadcaster(&self) -> &LifecycleBroadcaster {
        &self.broadcaster
    }
}

impl LifecycleSignal for SignalLifecycle {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.broadcaster.subscribe()
    }
}

impl Drop for SignalLifecycle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn stop_self() {
    // SAFETY: raise only delivers a signal to the calling process
    let rc = unsafe { libc::raise(libc::SIGSTOP) };
    if rc != 0 {
        warn!(error = %io::Error::last_os_error(), "Failed to stop process");
    }
}
