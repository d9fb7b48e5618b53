//! Compute shader sources and SPIR-V loading.
//!
//! Shaders are looked up by name. A precompiled `<name>.comp.spv` in the
//! context's shader directory wins; otherwise the embedded WGSL source is
//! compiled with naga. The workgroup size is baked into WGSL as a constant and
//! passed to precompiled SPIR-V as specialization constant 0.

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::context::GpuError;

pub const SHIFTER: &str = "shifter";
pub const DECIMATOR: &str = "decimator";

/// Entry point every compute shader exposes.
pub const ENTRY_POINT: &CStr = c"main";

const SHIFTER_WGSL: &str = include_str!("shaders/shifter.wgsl");
const DECIMATOR_WGSL: &str = include_str!("shaders/decimator.wgsl");

/// Embedded WGSL source for a named shader.
pub fn wgsl_source(name: &str) -> Option<&'static str> {
    match name {
        SHIFTER => Some(SHIFTER_WGSL),
        DECIMATOR => Some(DECIMATOR_WGSL),
        _ => None,
    }
}

/// Relative path of the precompiled binary for a named shader.
pub fn spirv_file_name(name: &str) -> String {
    format!("{name}.comp.spv")
}

/// Load SPIR-V for `name`, preferring a binary from `shader_dir`.
pub fn load_spirv(
    name: &str,
    shader_dir: Option<&Path>,
    workgroup_size: u32,
) -> Result<Vec<u32>, GpuError> {
    if let Some(dir) = shader_dir {
        let path = dir.join(spirv_file_name(name));
        if path.is_file() {
            log::debug!("Loading shader {name} from {}", path.display());
            let mut file = File::open(&path)?;
            return Ok(ash::util::read_spv(&mut file)?);
        }
    }
    let source = wgsl_source(name).ok_or_else(|| GpuError::UnknownShader(name.to_string()))?;
    compile_wgsl(name, source, workgroup_size)
}

/// Compile WGSL to SPIR-V 1.0 with `WORKGROUP_SIZE` defined.
pub fn compile_wgsl(name: &str, source: &str, workgroup_size: u32) -> Result<Vec<u32>, GpuError> {
    let source = format!("const WORKGROUP_SIZE: u32 = {workgroup_size}u;\n{source}");
    let compile_error = |message: String| GpuError::ShaderCompile {
        name: name.to_string(),
        message,
    };

    let module = naga::front::wgsl::parse_str(&source)
        .map_err(|e| compile_error(e.emit_to_string(&source)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)
        .map_err(|e| compile_error(format!("validation failed: {e}")))?;

    let mut options = spv::Options::default();
    options.lang_version = (1, 0);
    let pipeline_options = spv::PipelineOptions {
        entry_point: ENTRY_POINT.to_string_lossy().into_owned(),
        shader_stage: naga::ShaderStage::Compute,
    };
    spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| compile_error(format!("SPIR-V emit failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_embedded_shaders_compile() {
        for name in [SHIFTER, DECIMATOR] {
            let words = compile_wgsl(name, wgsl_source(name).unwrap(), 64)
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_eq!(words[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn test_workgroup_size_is_baked_in() {
        let a = compile_wgsl(SHIFTER, SHIFTER_WGSL, 64).unwrap();
        let b = compile_wgsl(SHIFTER, SHIFTER_WGSL, 128).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_shader() {
        assert!(matches!(
            load_spirv("missing", None, 64),
            Err(GpuError::UnknownShader(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_shader_dir_without_binary_falls_back_to_wgsl() {
        let dir = tempfile::tempdir().unwrap();
        let words = load_spirv(DECIMATOR, Some(dir.path()), 64).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_shader_dir_binary_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let compiled = compile_wgsl(SHIFTER, SHIFTER_WGSL, 32).unwrap();
        let bytes: &[u8] = bytemuck::cast_slice(&compiled);
        std::fs::write(dir.path().join(spirv_file_name(SHIFTER)), bytes).unwrap();

        let loaded = load_spirv(SHIFTER, Some(dir.path()), 64).unwrap();
        assert_eq!(loaded, compiled);
    }

    #[test]
    fn test_invalid_wgsl_reports_name() {
        let err = compile_wgsl("broken", "fn main( {", 64).unwrap_err();
        assert!(matches!(err, GpuError::ShaderCompile { ref name, .. } if name == "broken"));
    }
}
