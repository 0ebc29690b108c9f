use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::scheduler::{RevealConfig, RevealScheduler, RevealState, TickOutcome};

/// What a renderer needs: the current prefix and whether more is coming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevealView {
    pub displayed: String,
    pub is_typing: bool,
    /// The session completed and later growth is being held back.
    pub held: bool,
}

enum Control {
    ForceComplete,
}

type CompleteFn = Box<dyn FnMut() + Send + 'static>;

/// Runs a [`RevealScheduler`] on the tokio runtime.
///
/// The driver re-arms every `check_interval` while typing and sleeps until the
/// target changes otherwise. Dropping the handle aborts the driver.
pub struct RevealTask {
    target_tx: watch::Sender<String>,
    view_rx: watch::Receiver<RevealView>,
    control_tx: mpsc::UnboundedSender<Control>,
    handle: JoinHandle<()>,
}

impl RevealTask {
    pub fn spawn(config: RevealConfig) -> Self {
        Self::spawn_inner(config, None)
    }

    /// Like [`RevealTask::spawn`], calling `on_complete` once per finished typing session.
    pub fn spawn_with_callback(
        config: RevealConfig,
        on_complete: impl FnMut() + Send + 'static,
    ) -> Self {
        Self::spawn_inner(config, Some(Box::new(on_complete)))
    }

    fn spawn_inner(config: RevealConfig, on_complete: Option<CompleteFn>) -> Self {
        let (target_tx, target_rx) = watch::channel(String::new());
        let (view_tx, view_rx) = watch::channel(RevealView::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let scheduler = RevealScheduler::new(config);
        let handle = tokio::spawn(drive(scheduler, target_rx, view_tx, control_rx, on_complete));
        Self {
            target_tx,
            view_rx,
            control_tx,
            handle,
        }
    }

    /// Replace the target text. Growth, shrink and reset all go through here.
    pub fn set_target(&self, target: impl Into<String>) {
        let target = target.into();
        self.target_tx.send_if_modified(|current| {
            if *current == target {
                false
            } else {
                *current = target;
                true
            }
        });
    }

    /// Skip the animation: show the whole current target now.
    pub fn force_complete(&self) {
        let _ = self.control_tx.send(Control::ForceComplete);
    }

    pub fn view(&self) -> RevealView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RevealView> {
        self.view_rx.clone()
    }

    /// Wait until the current target is fully displayed.
    ///
    /// Text held back after completion (see [`super::AfterComplete::Hold`]) is
    /// shown at once; a session still typing is left to finish at its pace.
    pub async fn settle(&self) {
        let mut rx = self.subscribe();
        let mut forced = false;
        loop {
            {
                let view = rx.borrow_and_update();
                let target = self.target_tx.borrow();
                if !view.is_typing && view.displayed == *target {
                    return;
                }
                if view.held && !forced {
                    forced = true;
                    self.force_complete();
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the driver. Equivalent to dropping the handle.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for RevealTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn drive(
    mut scheduler: RevealScheduler,
    mut target_rx: watch::Receiver<String>,
    view_tx: watch::Sender<RevealView>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut on_complete: Option<CompleteFn>,
) {
    let check_interval = scheduler.config().check_interval;
    loop {
        let now = Instant::now().into_std();
        {
            let target = target_rx.borrow_and_update();
            scheduler.set_target(&target, now);
        }

        if scheduler.tick(now) == TickOutcome::Completed {
            debug!(chars = scheduler.displayed().chars().count(), "reveal complete");
            if let Some(cb) = on_complete.as_mut() {
                cb();
            }
        }
        publish(&view_tx, &scheduler);

        let control = if scheduler.is_typing() {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => None,
                changed = target_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
                ctrl = control_rx.recv() => match ctrl {
                    Some(ctrl) => Some(ctrl),
                    None => break,
                },
            }
        } else {
            tokio::select! {
                changed = target_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
                ctrl = control_rx.recv() => match ctrl {
                    Some(ctrl) => Some(ctrl),
                    None => break,
                },
            }
        };

        if let Some(Control::ForceComplete) = control {
            {
                let target = target_rx.borrow_and_update();
                scheduler.set_target(&target, Instant::now().into_std());
            }
            trace!("force complete");
            if scheduler.force_complete() {
                if let Some(cb) = on_complete.as_mut() {
                    cb();
                }
            }
            publish(&view_tx, &scheduler);
        }
    }
}

fn publish(view_tx: &watch::Sender<RevealView>, scheduler: &RevealScheduler) {
    view_tx.send_if_modified(|view| {
        let typing = scheduler.is_typing();
        let held = scheduler.state() == RevealState::Completed
            && scheduler.displayed().len() < scheduler.target().len();
        if view.displayed == scheduler.displayed()
            && view.is_typing == typing
            && view.held == held
        {
            return false;
        }
        view.displayed.clear();
        view.displayed.push_str(scheduler.displayed());
        view.is_typing = typing;
        view.held = held;
        true
    });
}
