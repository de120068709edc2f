//! Test: Compile - authored YAML against the built-in instrument drivers

use crate::helpers::*;
use prober::compiler::{CompileError, PatternCompiler};
use prober::core::{Action, Argument, HardwareRegistry, ParsedProcedure};
use prober::device::DriverRegistry;
use prober::persistence::ArtifactStore;
use std::time::Duration;

const HARDWARE: &str = r#"
SCOPE1:
  Type: VISA
  Default: "TCPIP0::10.0.0.5::INSTR"
  Driver: AgilentDSO7000A
LASER1:
  Type: DIRECT
  Default: "10.0.0.9:5000"
  Driver: TSL_210H
"#;

const PROCEDURE: &str = r#"
name: "Laser sweep check"
steps:
  - values: ["Run", "LASER1", ".", "run_set_wavelength 1550"]
    kinds: ["Run", "[DEV]", ".", "[FNC]"]
  - values: ["Run", "LASER1", ".", "run_turn_output_on"]
    kinds: ["Run", "[DEV]", ".", "[FNC]"]
  - values: ["Run", "SCOPE1", ".", "run_measure_vpp", "1", "as", "vpp", "<=", "???"]
    kinds: ["Run", "[DEV]", ".", "[FNC]", "[STR]", "as", "[STR]", "[OP]", "[STR]"]
  - values: ["Measure", "the ripple by eye"]
    kinds: ["Measure", "[STR]"]
"#;

fn builtin() -> (prober::CapabilityRegistry, HardwareRegistry) {
    let capabilities = DriverRegistry::builtin(Duration::from_millis(500))
        .capability_registry()
        .unwrap();
    let hardware: HardwareRegistry = serde_yaml::from_str(HARDWARE).unwrap();
    (capabilities, hardware)
}

/// Compiling twice yields identical artifacts
#[test]
fn test_compile_is_deterministic() {
    let (capabilities, hardware) = builtin();
    let compiler = PatternCompiler::new(&capabilities, &hardware);
    let procedure = ParsedProcedure::from_yaml(PROCEDURE).unwrap();

    let (config_a, generated_a) = compiler.compile(&procedure, "sweep").unwrap();
    let (config_b, generated_b) = compiler.compile(&procedure, "sweep").unwrap();

    assert_eq!(config_a.to_json().unwrap(), config_b.to_json().unwrap());
    assert_eq!(generated_a.to_yaml().unwrap(), generated_b.to_yaml().unwrap());
    assert_eq!(config_a.devices, vec!["LASER1", "SCOPE1"]);
    assert_eq!(config_a.missing_data(), vec!["sweep.step3.arg9"]);
}

/// `run_measure_vpp` is not shadowed by shorter operation names and inline
/// arguments are kept
#[test]
fn test_builtin_operations_resolve() {
    let (capabilities, hardware) = builtin();
    let compiler = PatternCompiler::new(&capabilities, &hardware);
    let procedure = ParsedProcedure::from_yaml(PROCEDURE).unwrap();
    let (_, generated) = compiler.compile(&procedure, "sweep").unwrap();

    match &generated.statements[0].action {
        Action::Invoke { operation, args, .. } => {
            assert_eq!(operation, "run_set_wavelength");
            assert_eq!(args, &vec![Argument::literal("1550")]);
        }
        other => panic!("unexpected action {:?}", other),
    }
    match &generated.statements[2].action {
        Action::Invoke {
            operation, store_as, check, ..
        } => {
            assert_eq!(operation, "run_measure_vpp");
            assert_eq!(store_as, "vpp");
            assert!(check.is_some());
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert!(matches!(generated.statements[3].action, Action::Note { .. }));
}

/// An operation the scope does not have is reported with its step
#[test]
fn test_operation_from_other_driver_is_rejected() {
    let (capabilities, hardware) = builtin();
    let compiler = PatternCompiler::new(&capabilities, &hardware);
    let procedure = ParsedProcedure::new("bad").with_step(call("SCOPE1", "run_set_wavelength"));

    assert_eq!(
        compiler.compile(&procedure, "bad").unwrap_err(),
        CompileError::FunctionNotFound {
            step: 1,
            device: "SCOPE1".to_string(),
            entered: "run_set_wavelength".to_string(),
        }
    );
}

#[test]
fn test_empty_procedure_is_rejected() {
    let (capabilities, hardware) = builtin();
    let compiler = PatternCompiler::new(&capabilities, &hardware);
    assert_eq!(
        compiler.compile(&ParsedProcedure::new("empty"), "empty").unwrap_err(),
        CompileError::EmptyProcedure
    );
}

/// Saved artifacts load back equal and their devices validate
#[test]
fn test_artifacts_roundtrip_through_disk() {
    let (capabilities, hardware) = builtin();
    let compiler = PatternCompiler::new(&capabilities, &hardware);
    let procedure = ParsedProcedure::from_yaml(PROCEDURE).unwrap();
    let (config, generated) = compiler.compile(&procedure, "sweep").unwrap();

    let root = temp_dir("compile");
    let store = ArtifactStore::new(root.join("configs"), root.join("procedures"));
    store.save("sweep", &config, &generated).unwrap();

    assert_eq!(store.load_config("sweep").unwrap(), config);
    assert_eq!(store.load_procedures(&config).unwrap(), vec![generated]);
    std::fs::remove_dir_all(root).ok();
}
