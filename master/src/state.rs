// master/src/state.rs

use common::{Executor, TaskService};

#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
    pub executor: Executor,
}

impl AppState {
    pub fn new(tasks: TaskService, executor: Executor) -> Self {
        Self { tasks, executor }
    }
}
