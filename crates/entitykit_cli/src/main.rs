//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `entitykit_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use entitykit_core::{
    AttributeKind, EntityDescription, Model, PersistenceStack, StackConfig, StoreError,
};

fn run() -> Result<(), StoreError> {
    let model = Model::new(vec![
        EntityDescription::new("Person").with_attribute("name", AttributeKind::Text)
    ])
    .map_err(StoreError::Validation)?;

    let mut stack = PersistenceStack::open_in_memory(model, StackConfig::default())?;
    let person = stack.find_or_create("Person", &[("name", "probe".into())])?;
    stack.save()?;

    println!("entitykit_core version={}", entitykit_core::core_version());
    println!("probe person id={}", person.id());
    println!("person count={}", stack.count(&entitykit_core::FetchRequest::all("Person"))?);
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("smoke probe failed: {err}");
        std::process::exit(1);
    }
}
