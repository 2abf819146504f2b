use super::CliContext;

pub fn execute(context: &CliContext) -> anyhow::Result<()> {
    for name in context.registry.names() {
        if let Some(model) = context.registry.get(&name) {
            println!("{:<12} {}", name, model.parameter_names().join(", "));
        }
    }
    Ok(())
}
