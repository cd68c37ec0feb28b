use segstore_storage::StorageFactoryRegistry;

/// Print every registered backend and the layouts it supports.
pub fn run_list(registry: &StorageFactoryRegistry) {
    println!("{:<12} LAYOUTS", "BACKEND");
    for name in registry.names() {
        let layouts: Vec<String> = registry
            .descriptors()
            .into_iter()
            .filter(|d| d.name == name)
            .map(|d| d.layout.to_string())
            .collect();
        println!("{:<12} {}", name, layouts.join(", "));
    }
}
