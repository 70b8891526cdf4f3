#![allow(dead_code)]

use dagstack::plan::{Plan, Task};
use dagstack::types::{Complexity, ExecutionStrategy};

/// Builder for `Plan` to simplify test setup.
pub struct PlanBuilder {
    name: String,
    strategy: ExecutionStrategy,
    tasks: Vec<Task>,
}

impl PlanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            strategy: ExecutionStrategy::Parallel,
            tasks: Vec::new(),
        }
    }

    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn task(mut self, task: TaskBuilder) -> Self {
        self.tasks.push(task.build());
        self
    }

    pub fn build(self) -> Plan {
        Plan::new(self.name, self.strategy, self.tasks)
    }
}

/// Builder for `Task`.
///
/// Tasks start out runnable in every mode: non-empty instructions and one
/// acceptance criterion.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        let mut task = Task::new(id, format!("Task {id}"));
        task.instructions = format!("Implement {id}.");
        task.acceptance_criteria = vec![format!("{id} is done")];
        Self { task }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn touches(mut self, file: &str) -> Self {
        self.task.touches.push(file.to_string());
        self
    }

    pub fn produces(mut self, file: &str) -> Self {
        self.task.produces.push(file.to_string());
        self
    }

    pub fn instructions(mut self, text: &str) -> Self {
        self.task.instructions = text.to_string();
        self
    }

    pub fn criterion(mut self, text: &str) -> Self {
        self.task.acceptance_criteria.push(text.to_string());
        self
    }

    pub fn no_criteria(mut self) -> Self {
        self.task.acceptance_criteria.clear();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = n;
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.task.complexity = complexity;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
