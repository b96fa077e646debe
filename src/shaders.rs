//! WGSL programs for the compositor stages.
//!
//! Each program is `common.wgsl` (bindings, vertex stage, texel loads) +
//! `logluv.wgsl` (HDR packing) + the stage's fragment entry point.

use crate::error::CompileError;
use crate::stages::StageKind;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const LOGLUV_WGSL: &str = include_str!("shaders/logluv.wgsl");
const COPY_WGSL: &str = include_str!("shaders/copy.wgsl");
const THRESHOLD_WGSL: &str = include_str!("shaders/threshold.wgsl");
const BLUR_WGSL: &str = include_str!("shaders/blur.wgsl");
const TONEMAP_WGSL: &str = include_str!("shaders/tonemap.wgsl");

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Source for one pixel shader, tagged with the stage it implements.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub stage: StageKind,
    pub label: String,
    pub source: String,
}

impl ShaderProgram {
    /// The built-in program for `stage`.
    pub fn builtin(stage: StageKind) -> Self {
        let body = match stage {
            StageKind::Copy => COPY_WGSL,
            StageKind::Threshold => THRESHOLD_WGSL,
            StageKind::Blur => BLUR_WGSL,
            StageKind::Tonemap => TONEMAP_WGSL,
        };

        Self {
            stage,
            label: format!("Bloom {} Shader", stage),
            source: [COMMON_WGSL, LOGLUV_WGSL, body].join("\n"),
        }
    }

    pub fn from_source(stage: StageKind, label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            stage,
            label: label.into(),
            source: source.into(),
        }
    }

    /// Parse and validate the WGSL, and check both entry points are present.
    pub fn validate(&self) -> Result<naga::Module, CompileError> {
        let module = naga::front::wgsl::parse_str(&self.source)
            .map_err(|e| self.error(e.emit_to_string(&self.source)))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| self.error(e.emit_to_string(&self.source)))?;

        for (name, stage) in [
            (VERTEX_ENTRY, naga::ShaderStage::Vertex),
            (FRAGMENT_ENTRY, naga::ShaderStage::Fragment),
        ] {
            if !module.entry_points.iter().any(|ep| ep.name == name && ep.stage == stage) {
                return Err(self.error(format!("missing {:?} entry point '{}'", stage, name)));
            }
        }

        Ok(module)
    }

    fn error(&self, message: String) -> CompileError {
        CompileError {
            label: self.label.clone(),
            message,
        }
    }
}

/// All four built-in programs, in `StageKind::ALL` order.
pub fn builtin_programs() -> Vec<ShaderProgram> {
    StageKind::ALL.iter().map(|&stage| ShaderProgram::builtin(stage)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_programs_validate() {
        for program in builtin_programs() {
            if let Err(e) = program.validate() {
                panic!("{}", e);
            }
        }
    }

    #[test]
    fn test_builtin_labels_name_the_stage() {
        let labels: Vec<String> = builtin_programs().into_iter().map(|p| p.label).collect();
        assert_eq!(
            labels,
            vec![
                "Bloom copy Shader",
                "Bloom threshold Shader",
                "Bloom blur Shader",
                "Bloom tonemap Shader",
            ]
        );
    }

    #[test]
    fn test_malformed_source_is_rejected() {
        let program = ShaderProgram::from_source(StageKind::Blur, "broken", "fn fs_main( {");
        let err = program.validate().unwrap_err();
        assert_eq!(err.label, "broken");
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let source = format!("{}\n{}", COMMON_WGSL, LOGLUV_WGSL);
        let program = ShaderProgram::from_source(StageKind::Copy, "no fragment", source);
        let err = program.validate().unwrap_err();
        assert!(err.message.contains("fs_main"), "{}", err.message);
    }

    #[test]
    fn test_blur_source_carries_kernel() {
        let source = ShaderProgram::builtin(StageKind::Blur).source;
        for tap in ["tap(pos, -4.0, 0.05)", "tap(pos, 0.0, 0.16)", "tap(pos, 4.0, 0.05)"] {
            assert!(source.contains(tap), "missing {}", tap);
        }
    }
}
