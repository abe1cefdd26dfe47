use std::sync::{Condvar, Mutex};

use tracing::Level;

pub const MAX_WAIT_TIME_MILLIS: u128 = 2000;

pub fn current_time_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis()
}

pub fn waiting_too_long(start_time: u128) -> bool {
    let current_time = current_time_millis();
    current_time - start_time > MAX_WAIT_TIME_MILLIS
}

pub fn init_log() {
    tracing_subscriber::fmt()
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_max_level(Level::INFO)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();
}

pub struct CondMutex<T> {
    m: Mutex<T>,
    cond: Condvar,
}

impl<T> CondMutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            m: Mutex::new(data),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<T> {
        self.m.lock().unwrap()
    }

    pub fn wait<'a>(&self, guard: std::sync::MutexGuard<'a, T>) -> std::sync::MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap()
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
