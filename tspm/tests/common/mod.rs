use std::sync::Arc;
use tspm::event::EventBus;
use tspm::spec::ProcessSpec;
use tspm::supervisor::Supervisor;

pub fn spec(name: &str, script: &str, args: &[&str]) -> ProcessSpec {
    let yaml = format!(
        "name: {name}\nscript: {script}\nargs: [{}]\nautorestart: false\n",
        args.iter().map(|a| format!("\"{a}\"")).collect::<Vec<_>>().join(", ")
    );
    serde_yaml::from_str(&yaml).unwrap()
}

pub fn supervisor() -> Arc<Supervisor> {
    Supervisor::new(Arc::new(EventBus::new()), None)
}
