// src/pipeline.rs
use tracing::debug;

type Stage<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// An ordered list of named stages, applied in declaration order by [`Pipeline::run`].
pub struct Pipeline<T> {
    name: &'static str,
    stages: Vec<(&'static str, Stage<T>)>,
}

impl<T> Pipeline<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, name: &'static str, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.stages.push((name, Box::new(f)));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(n, _)| *n).collect()
    }

    pub fn run(&self, initial: T) -> T {
        self.stages.iter().fold(initial, |value, (stage, f)| {
            debug!(pipeline = self.name, stage, "running stage");
            f(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_declared_order() {
        let p = Pipeline::new("arith")
            .stage("add", |x: i64| x + 2)
            .stage("mul", |x: i64| x * 10);
        assert_eq!(p.run(1), 30);
        assert_eq!(p.stage_names(), vec!["add", "mul"]);
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let p: Pipeline<Vec<u8>> = Pipeline::new("noop");
        assert_eq!(p.run(vec![1, 2]), vec![1, 2]);
    }
}
