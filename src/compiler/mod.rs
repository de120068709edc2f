//! Pattern compiler - turns authored steps into a configuration and an
//! executable procedure
//!
//! Compilation is pure: the same parsed procedure compiled against the same
//! registries always produces identical output, and nothing is written to
//! storage.

pub mod resolve;

use crate::core::{
    token::{DEVICE_SYMBOL, FUNCTION_SYMBOL},
    Action, Argument, CapabilityError, CapabilityRegistry, Check, Comparison,
    CompiledConfiguration, GeneratedProcedure, HardwareRegistry, ParsedProcedure,
    StageDescriptor, Statement, StepDefinition, Token,
};
use resolve::resolve_function;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Keyword that introduces the data key a call result is stored under
pub const STORE_KEYWORD: &str = "as";
/// Leading keyword of an assignment step
pub const SET_KEYWORD: &str = "Set";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Procedure has no steps")]
    EmptyProcedure,

    #[error("Step {step}: unknown device '{device}'")]
    UnknownDevice { step: usize, device: String },

    #[error("Step {step}: invalid comparison operator '{operator}'")]
    InvalidOperator { step: usize, operator: String },

    #[error("Step {step}: no operation of {device} matches '{entered}'")]
    FunctionNotFound {
        step: usize,
        device: String,
        entered: String,
    },

    #[error("Step {step}: function reference without a preceding device")]
    FunctionWithoutDevice { step: usize },

    #[error("Step {step}: {reason}")]
    MalformedStep { step: usize, reason: String },

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Compiles parsed procedures against the capability and hardware registries
pub struct PatternCompiler<'a> {
    capabilities: &'a CapabilityRegistry,
    hardware: &'a HardwareRegistry,
}

/// Compiler state for one step
struct StepCompiler<'c, 'a> {
    compiler: &'c PatternCompiler<'a>,
    procedure: &'c str,
    step: usize,
    tokens: Vec<Token>,
}

impl<'a> PatternCompiler<'a> {
    pub fn new(capabilities: &'a CapabilityRegistry, hardware: &'a HardwareRegistry) -> Self {
        Self {
            capabilities,
            hardware,
        }
    }

    /// Compile `procedure` under `name`.
    ///
    /// `name` becomes the configuration name, the generated procedure name
    /// and the source of the single procedure stage.
    pub fn compile(
        &self,
        procedure: &ParsedProcedure,
        name: &str,
    ) -> Result<(CompiledConfiguration, GeneratedProcedure), CompileError> {
        if procedure.is_empty() {
            return Err(CompileError::EmptyProcedure);
        }

        info!("Compiling procedure: {} ({} steps)", name, procedure.steps.len());

        let mut statements = Vec::with_capacity(procedure.steps.len());
        let mut devices: Vec<String> = Vec::new();

        for (index, definition) in procedure.steps.iter().enumerate() {
            let step = index + 1;
            let (statement, device) = self.compile_step(name, step, definition)?;
            debug!("Compiled {}", statement);

            if let Some(device) = device {
                if !devices.contains(&device) {
                    devices.push(device);
                }
            }
            statements.push(statement);
        }

        let generated = GeneratedProcedure {
            name: name.to_string(),
            statements,
        };

        let mut config =
            CompiledConfiguration::new(name).with_stage(StageDescriptor::procedure(name, 1));
        config.devices = devices;
        for key in generated.pending_keys() {
            config.set_data(key, Value::Null);
        }

        info!(
            "Compiled {}: {} statements, {} devices, {} pending inputs",
            name,
            generated.statements.len(),
            config.devices.len(),
            config.missing_data().len()
        );

        Ok((config, generated))
    }

    fn compile_step(
        &self,
        procedure: &str,
        step: usize,
        definition: &StepDefinition,
    ) -> Result<(Statement, Option<String>), CompileError> {
        let tokens = definition.tokens().ok_or_else(|| CompileError::MalformedStep {
            step,
            reason: format!(
                "{} values for {} kinds",
                definition.values.len(),
                definition.kinds.len()
            ),
        })?;

        StepCompiler {
            compiler: self,
            procedure,
            step,
            tokens,
        }
        .compile(definition)
    }
}

impl<'c, 'a> StepCompiler<'c, 'a> {
    fn compile(self, definition: &StepDefinition) -> Result<(Statement, Option<String>), CompileError> {
        self.validate()?;

        let device_at = self
            .tokens
            .iter()
            .position(|t| matches!(t, Token::DeviceRef(_)));
        let function_at = self
            .tokens
            .iter()
            .position(|t| matches!(t, Token::FunctionRef(_)));

        let (action, device) = match (device_at, function_at) {
            (Some(d), Some(f)) if d < f => {
                let action = self.invoke(d, f)?;
                let device = self.device_name(d);
                (action, device)
            }
            (_, Some(_)) => return Err(CompileError::FunctionWithoutDevice { step: self.step }),
            (Some(d), None) => (
                Action::Note {
                    text: definition.to_string(),
                },
                self.device_name(d),
            ),
            (None, None) => (self.plain(definition)?, None),
        };

        Ok((
            Statement {
                step: self.step,
                action,
            },
            device,
        ))
    }

    /// Reject unknown devices and operators before building anything
    fn validate(&self) -> Result<(), CompileError> {
        for token in &self.tokens {
            match token {
                Token::DeviceRef(device) => {
                    let device = device.trim();
                    if device.is_empty()
                        || device == DEVICE_SYMBOL
                        || !self.compiler.hardware.contains(device)
                    {
                        return Err(CompileError::UnknownDevice {
                            step: self.step,
                            device: device.to_string(),
                        });
                    }
                }
                Token::Operator(operator) => {
                    operator
                        .parse::<Comparison>()
                        .map_err(|operator| CompileError::InvalidOperator {
                            step: self.step,
                            operator,
                        })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn device_name(&self, at: usize) -> Option<String> {
        match &self.tokens[at] {
            Token::DeviceRef(device) => Some(device.trim().to_string()),
            _ => None,
        }
    }

    fn argument(&self, at: usize) -> Option<Argument> {
        let token = self.tokens.get(at)?;
        match token {
            Token::StringPlaceholder(value) => Some(if token.is_unfilled() {
                Argument::pending(format!("{}.step{}.arg{}", self.procedure, self.step, at + 1))
            } else {
                Argument::literal(value.clone())
            }),
            _ => None,
        }
    }

    fn operator(&self, at: usize) -> Result<Comparison, CompileError> {
        match &self.tokens[at] {
            Token::Operator(operator) => {
                operator
                    .parse()
                    .map_err(|operator| CompileError::InvalidOperator {
                        step: self.step,
                        operator,
                    })
            }
            _ => Err(self.malformed("expected a comparison operator")),
        }
    }

    fn malformed(&self, reason: &str) -> CompileError {
        CompileError::MalformedStep {
            step: self.step,
            reason: reason.to_string(),
        }
    }

    fn invoke(&self, device_at: usize, function_at: usize) -> Result<Action, CompileError> {
        let device = self.device_name(device_at).unwrap_or_default();
        let entered = match &self.tokens[function_at] {
            Token::FunctionRef(entered) => entered.trim().to_string(),
            _ => String::new(),
        };

        let function_not_found = || CompileError::FunctionNotFound {
            step: self.step,
            device: device.clone(),
            entered: entered.clone(),
        };
        if entered.is_empty() || entered == FUNCTION_SYMBOL {
            return Err(function_not_found());
        }

        let driver = self
            .compiler
            .hardware
            .get(&device)
            .map(|d| d.driver.as_str())
            .ok_or_else(|| CompileError::UnknownDevice {
                step: self.step,
                device: device.clone(),
            })?;
        let descriptor = self.compiler.capabilities.describe(driver)?;
        let resolved = resolve_function(descriptor, &entered).ok_or_else(function_not_found)?;

        let operation = resolved.operation.to_string();
        let mut args: Vec<Argument> = resolved
            .inline_args
            .into_iter()
            .map(Argument::literal)
            .collect();
        let mut store_as = None;
        let mut check = None;

        let mut at = function_at + 1;
        while at < self.tokens.len() {
            match &self.tokens[at] {
                Token::Literal(keyword) if keyword.eq_ignore_ascii_case(STORE_KEYWORD) => {
                    match self.argument(at + 1) {
                        Some(Argument::Literal { value }) => store_as = Some(value.trim().to_string()),
                        Some(Argument::Pending { .. }) => {
                            return Err(self.malformed("'as' needs a fixed data key, not an input"))
                        }
                        None => return Err(self.malformed("'as' must be followed by a data key")),
                    }
                    at += 2;
                }
                Token::Operator(_) => {
                    let op = self.operator(at)?;
                    let expected = self
                        .argument(at + 1)
                        .ok_or_else(|| self.malformed("comparison is missing its expected value"))?;
                    if check.is_some() {
                        return Err(self.malformed("only one check per device call"));
                    }
                    check = Some(Check { op, expected });
                    at += 2;
                }
                Token::StringPlaceholder(_) => {
                    if let Some(arg) = self.argument(at) {
                        args.push(arg);
                    }
                    at += 1;
                }
                Token::DeviceRef(_) | Token::FunctionRef(_) => {
                    return Err(self.malformed("only one device call per step"));
                }
                Token::Literal(_) => at += 1,
            }
        }

        let store_as = store_as.unwrap_or_else(|| format!("{}.{}", device, operation));
        Ok(Action::Invoke {
            device,
            operation,
            args,
            store_as,
            check,
        })
    }

    /// Steps without a device: comparison, assignment or note
    fn plain(&self, definition: &StepDefinition) -> Result<Action, CompileError> {
        if let Some(at) = self.tokens.iter().position(|t| matches!(t, Token::Operator(_))) {
            let op = self.operator(at)?;
            let lhs = (0..at)
                .rev()
                .find_map(|i| self.argument(i))
                .ok_or_else(|| self.malformed("comparison is missing its left operand"))?;
            let rhs = (at + 1..self.tokens.len())
                .find_map(|i| self.argument(i))
                .ok_or_else(|| self.malformed("comparison is missing its right operand"))?;
            return Ok(Action::Compare { lhs, op, rhs });
        }

        let leads_with_set = matches!(
            self.tokens.first(),
            Some(Token::Literal(keyword)) if keyword.eq_ignore_ascii_case(SET_KEYWORD)
        );
        if leads_with_set {
            let mut placeholders = (0..self.tokens.len()).filter_map(|i| self.argument(i));
            if let (Some(key), Some(value)) = (placeholders.next(), placeholders.next()) {
                return Ok(Action::Assign { key, value });
            }
        }

        Ok(Action::Note {
            text: definition.to_string(),
        })
    }
}
