//! Task dependency graph.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::error::SessionError;
use crate::models::{Task, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    /// task id -> dependency ids, in task declaration order.
    deps: Vec<(String, Vec<String>)>,
}

impl TaskDag {
    /// Build and validate: every dependency must name a task in the same
    /// plan, and the graph must be acyclic.
    pub fn from_tasks(tasks: &[Task]) -> Result<Self, SessionError> {
        let ids: HashMap<&str, ()> = tasks.iter().map(|t| (t.id.as_str(), ())).collect();
        for task in tasks {
            for dep in &task.dependencies {
                if !ids.contains_key(dep.as_str()) {
                    return Err(SessionError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let dag = Self {
            deps: tasks
                .iter()
                .map(|t| (t.id.clone(), t.dependencies.clone()))
                .collect(),
        };
        dag.topological_order()?;
        Ok(dag)
    }

    /// Kahn's algorithm. Ties keep declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, SessionError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, deps) in &self.deps {
            in_degree.insert(id, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id);
            }
        }

        let mut queue: VecDeque<&str> = self
            .deps
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.deps.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.deps.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(SessionError::CyclicTasks(stuck));
        }
        Ok(order)
    }

    /// Pending tasks whose dependencies are all done.
    pub fn ready(&self, tasks: &[Task]) -> Vec<String> {
        let status: HashMap<&str, TaskStatus> =
            tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();
        self.deps
            .iter()
            .filter(|(id, _)| status.get(id.as_str()) == Some(&TaskStatus::Pending))
            .filter(|(_, deps)| {
                deps.iter()
                    .all(|d| status.get(d.as_str()) == Some(&TaskStatus::Done))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
