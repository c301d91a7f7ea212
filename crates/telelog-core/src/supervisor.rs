//! Task lifecycle: cooperative stop tokens and the start/stop surface
//!
//! Every task gets a [`TaskControl`] by reference when it is spawned. Stopping
//! a task sets its flag, wakes it if it is sleeping, and then waits until the
//! task reports that it has returned. Nothing is ever aborted from outside, so
//! a task always leaves its queue, lock, or open file in a consistent state.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use log::{info, warn};
use thiserror_no_std::Error;

use crate::sensors::SensorSource;

/// Tasks the supervisor can start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Producer(SensorSource),
    /// The aggregator, or the snapshot logger in the shared-snapshot variant
    Aggregator,
}

impl TaskId {
    pub const PRODUCERS: [TaskId; 4] = [
        TaskId::Producer(SensorSource::Humidity),
        TaskId::Producer(SensorSource::Temperature),
        TaskId::Producer(SensorSource::Pressure),
        TaskId::Producer(SensorSource::Motion),
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Producer(source) => source.name(),
            Self::Aggregator => "aggregator",
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Producer(source) => source.index(),
            Self::Aggregator => 4,
        }
    }
}

/// Cancellation token and completion signal for one task
pub struct TaskControl {
    running: AtomicBool,
    stop: AtomicBool,
    wake: Signal<CriticalSectionRawMutex, ()>,
    exited: Signal<CriticalSectionRawMutex, ()>,
}

impl TaskControl {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            wake: Signal::new(),
            exited: Signal::new(),
        }
    }

    /// Reset the token for a fresh run and mark the task as running
    pub fn arm(&self) {
        self.stop.store(false, Ordering::Release);
        self.wake.reset();
        self.exited.reset();
        self.running.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Ask the task to stop at its next suspension point
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.signal(());
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the full duration elapsed and the task should keep
    /// going, `false` if it should wind down.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }
        match select(Timer::after(duration), self.wake.wait()).await {
            Either::First(()) => !self.stop_requested(),
            Either::Second(()) => false,
        }
    }

    /// Called by the task itself as its very last action
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
        self.exited.signal(());
    }

    /// Wait until the task has called [`TaskControl::finish`]
    pub async fn join(&self) {
        if !self.is_running() {
            return;
        }
        self.exited.wait().await;
    }

    /// Run `task` to completion, then mark this control finished
    pub async fn scope<F: Future>(&self, task: F) -> F::Output {
        let output = task.await;
        self.finish();
        output
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// One control per task, owned by whoever owns the supervisor
pub struct TaskControls {
    slots: [TaskControl; 5],
}

impl TaskControls {
    pub const fn new() -> Self {
        Self {
            slots: [
                TaskControl::new(),
                TaskControl::new(),
                TaskControl::new(),
                TaskControl::new(),
                TaskControl::new(),
            ],
        }
    }

    pub fn get(&self, task: TaskId) -> &TaskControl {
        &self.slots[task.slot()]
    }
}

impl Default for TaskControls {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    #[error("no task slot available")]
    NoSlot,
    #[error("task resources unavailable")]
    Unavailable,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("{0} is not running")]
    NotRunning(&'static str),
    #[error("failed to launch {task}: {error}")]
    Launch {
        task: &'static str,
        error: LaunchError,
    },
}

/// Spawns tasks on behalf of the supervisor.
///
/// Implemented by the runtime that owns the executor. The launched task must
/// run with the given control and call [`TaskControl::finish`] when it
/// returns (for example by wrapping its body in [`TaskControl::scope`]).
pub trait TaskLauncher<'a> {
    fn launch(&mut self, task: TaskId, control: &'a TaskControl) -> Result<(), LaunchError>;
}

/// Starts and stops producer and aggregator tasks on command.
///
/// Owns no sampling logic; it only tracks task handles through their
/// controls and delegates spawning to a [`TaskLauncher`].
pub struct Supervisor<'a, L: TaskLauncher<'a>> {
    launcher: L,
    controls: &'a TaskControls,
}

impl<'a, L: TaskLauncher<'a>> Supervisor<'a, L> {
    pub fn new(launcher: L, controls: &'a TaskControls) -> Self {
        Self { launcher, controls }
    }

    pub fn is_running(&self, task: TaskId) -> bool {
        self.controls.get(task).is_running()
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn start(&mut self, task: TaskId) -> Result<(), SupervisorError> {
        let control = self.controls.get(task);
        if control.is_running() {
            return Err(SupervisorError::AlreadyRunning(task.name()));
        }

        control.arm();
        if let Err(error) = self.launcher.launch(task, control) {
            control.finish();
            return Err(SupervisorError::Launch {
                task: task.name(),
                error,
            });
        }
        info!("{} task started", task.name());
        Ok(())
    }

    /// Request a stop and wait until the task has actually returned
    pub async fn stop(&self, task: TaskId) -> Result<(), SupervisorError> {
        let control = self.controls.get(task);
        if !control.is_running() {
            return Err(SupervisorError::NotRunning(task.name()));
        }

        control.request_stop();
        control.join().await;
        info!("{} task stopped", task.name());
        Ok(())
    }

    /// Start every producer, then the aggregator.
    ///
    /// Tasks that are already running are left alone. The first launch
    /// failure is returned after the remaining tasks have been attempted.
    pub fn start_all(&mut self) -> Result<(), SupervisorError> {
        let mut first_error = None;
        for task in TaskId::PRODUCERS.into_iter().chain([TaskId::Aggregator]) {
            match self.start(task) {
                Ok(()) | Err(SupervisorError::AlreadyRunning(_)) => {}
                Err(e) => {
                    warn!("start_all: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop every producer first, then the aggregator, so the aggregator
    /// sees the producers' final readings.
    pub async fn stop_all(&self) {
        for task in TaskId::PRODUCERS {
            // Tasks that are not running are already where we want them
            let _ = self.stop(task).await;
        }
        let _ = self.stop(TaskId::Aggregator).await;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::cell::RefCell;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: RefCell<Vec<TaskId>>,
        refuse: Option<TaskId>,
    }

    impl<'a> TaskLauncher<'a> for RecordingLauncher {
        fn launch(&mut self, task: TaskId, _control: &'a TaskControl) -> Result<(), LaunchError> {
            if self.refuse == Some(task) {
                return Err(LaunchError::NoSlot);
            }
            self.launched.borrow_mut().push(task);
            Ok(())
        }
    }

    async fn worker(control: &TaskControl) -> u32 {
        let mut iterations = 0;
        while !control.stop_requested() {
            iterations += 1;
            if !control.sleep(Duration::from_millis(10)).await {
                break;
            }
        }
        iterations
    }

    #[test]
    fn start_twice_is_rejected() {
        let controls = TaskControls::new();
        let mut supervisor = Supervisor::new(RecordingLauncher::default(), &controls);
        let humidity = TaskId::Producer(SensorSource::Humidity);

        supervisor.start(humidity).unwrap();
        assert!(supervisor.is_running(humidity));
        assert_eq!(
            supervisor.start(humidity),
            Err(SupervisorError::AlreadyRunning("humidity"))
        );
        assert_eq!(supervisor.launcher().launched.borrow().len(), 1);
    }

    #[test]
    fn stop_of_idle_task_is_rejected() {
        let controls = TaskControls::new();
        let supervisor = Supervisor::new(RecordingLauncher::default(), &controls);
        assert_eq!(
            block_on(supervisor.stop(TaskId::Aggregator)),
            Err(SupervisorError::NotRunning("aggregator"))
        );
    }

    #[test]
    fn stop_waits_for_the_task_to_return() {
        let controls = TaskControls::new();
        let mut supervisor = Supervisor::new(RecordingLauncher::default(), &controls);
        let pressure = TaskId::Producer(SensorSource::Pressure);
        supervisor.start(pressure).unwrap();

        let control = controls.get(pressure);
        let (iterations, stopped) = block_on(join(control.scope(worker(control)), async {
            embassy_time::Timer::after(Duration::from_millis(25)).await;
            supervisor.stop(pressure).await
        }));

        assert_eq!(stopped, Ok(()));
        assert!(iterations >= 1);
        assert!(!supervisor.is_running(pressure));
    }

    #[test]
    fn failed_launch_leaves_task_idle() {
        let controls = TaskControls::new();
        let launcher = RecordingLauncher {
            refuse: Some(TaskId::Aggregator),
            ..Default::default()
        };
        let mut supervisor = Supervisor::new(launcher, &controls);

        let result = supervisor.start_all();

        assert_eq!(
            result,
            Err(SupervisorError::Launch {
                task: "aggregator",
                error: LaunchError::NoSlot
            })
        );
        assert!(!supervisor.is_running(TaskId::Aggregator));
        assert_eq!(
            *supervisor.launcher().launched.borrow(),
            TaskId::PRODUCERS.to_vec()
        );
    }

    #[test]
    fn sleep_returns_early_on_stop() {
        let control = TaskControl::new();
        control.arm();
        control.request_stop();
        assert!(!block_on(control.sleep(Duration::from_secs(60))));
    }
}
