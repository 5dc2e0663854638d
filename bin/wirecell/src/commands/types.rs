use wirecell_primitives::builtin_types;

pub fn run() {
    let types = builtin_types();

    println!("Built-in module types ({}):", types.len());
    println!();
    for name in types.names() {
        let Some(factory) = types.get(name) else {
            continue;
        };
        let manifest = factory.manifest();
        println!("  {}", name);
        if !manifest.provides.is_empty() {
            println!("    provides: {}", manifest.provides.join(", "));
        }
        for requirement in &manifest.requires {
            let mut shape = requirement.capability.clone();
            if requirement.is_list() {
                shape = format!("[{}]", shape);
            }
            if requirement.optional {
                shape.push('?');
            }
            println!("    requires: {} = {}", requirement.parameter, shape);
        }
    }
}
