use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../config.template.toml");

    let template = r#"# relayts engine configuration template
# Copy this file to 'relayts.toml' or 'config.toml' and adjust as needed.

# Sync buffer sizing: "<enough_blocks>,<low_blocks>,<max_mib>"
sync_buffer = "10,5,8"
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
