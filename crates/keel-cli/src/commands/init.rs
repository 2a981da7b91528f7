use std::path::Path;

use keel_build::context::CONTEXT_DIR;
use keel_core::KeelConfig;
use keel_core::config::CONFIG_FILE;

const CONFIG_TEMPLATE: &str = r#"[project]
# name = "my-app"

[build]
# base_image = "python:3.11-slim"
# build_tools = ["gcc"]
# manifest = "requirements.txt"
# workdir = "/app"
# data_dir = "data"

[runtime]
# entrypoint = ["python", "main.py"]
# unbuffered = true
# no_bytecode = true
# env_file = ".env"
# port = 8080
"#;

/// Initialize keel in an existing project.
pub async fn init_project() -> anyhow::Result<()> {
    let mut created = Vec::new();

    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        eprintln!("{CONFIG_FILE} already exists, skipping");
    } else {
        std::fs::write(config_path, CONFIG_TEMPLATE)?;
        created.push(CONFIG_FILE.to_owned());
    }

    let gitignore_path = Path::new(".gitignore");
    let existing = if gitignore_path.exists() {
        std::fs::read_to_string(gitignore_path)?
    } else {
        String::new()
    };
    // Staged context and local secrets never belong in version control
    let wanted = [format!("{CONTEXT_DIR}/"), ".env".to_owned()];
    let missing: Vec<&str> = wanted
        .iter()
        .map(String::as_str)
        .filter(|entry| !existing.lines().any(|l| l.trim() == *entry))
        .collect();
    if !missing.is_empty() {
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for entry in &missing {
            content.push_str(entry);
            content.push('\n');
        }
        std::fs::write(gitignore_path, content)?;
        created.push(format!(".gitignore ({})", missing.join(", ")));
    }

    if created.is_empty() {
        println!("Nothing to create; already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    let config = KeelConfig::load(Path::new("."))?;
    println!();
    println!("Next steps:");
    println!();
    if Path::new(&config.build.manifest).exists() {
        println!("  1. Dependencies are read from {}", config.build.manifest);
    } else {
        println!("  1. List dependencies in {}", config.build.manifest);
    }
    println!();
    println!("  2. Run locally:");
    println!("     keel run");
    println!();
    println!("  3. Build and run the image:");
    println!("     keel build && keel up");

    Ok(())
}
