//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "binary"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Build script emitting build metadata for the daemon."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
