//! Preset validation and compilation.
//!
//! Turns serde-shaped [`Mapping`] records into runnable form: outputs
//! classified, symbols resolved, macro text parsed into its AST cache.
//! Schema and semantic violations reject the preset; a macro that fails to
//! parse only disables its own mapping, unless every mapping is lost.

use std::sync::Arc;

use crate::error::Error;
use crate::keys::SymbolTable;
use crate::macros::{parse, Program};
use crate::preset::{ConfigKind, InputCombination, Mapping, Preset, Shaping, TargetUinput};
use crate::uinputs;

/// One finding from validation. `disables_only` findings leave the rest of
/// the preset usable.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub index: usize,
    pub mapping: String,
    pub reason: String,
    pub disables_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub preset: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn disabled_count(&self) -> usize {
        self.issues.iter().filter(|i| i.disables_only).count()
    }
}

/// A mapping's output after classification.
#[derive(Debug, Clone)]
pub enum CompiledOutput {
    /// Consume the trigger, emit nothing (dead-keying a physical key).
    Disabled,
    /// Press/release mirroring onto a fixed `(type, code)`.
    Key { ty: u16, code: u16 },
    /// Shaped analog translation onto a target axis.
    Axis { ty: u16, code: u16 },
    Macro(Arc<Program>),
}

#[derive(Debug, Clone)]
pub struct CompiledMapping {
    /// Index of the record in the preset file, for reports and logs.
    pub index: usize,
    pub name: String,
    pub combination: InputCombination,
    pub target: TargetUinput,
    pub output: CompiledOutput,
    pub shape: Shaping,
    pub release_combination_keys: bool,
    pub key_sleep_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CompiledPreset {
    pub name: String,
    pub group_key: String,
    pub mappings: Vec<CompiledMapping>,
    pub report: ValidationReport,
}

impl CompiledPreset {
    /// Upper bound used by the supervisor when draining handlers on stop.
    pub fn max_release_timeout_ms(&self) -> u64 {
        self.mappings
            .iter()
            .map(|m| m.shape.release_timeout_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Validates and compiles a preset against the symbol table and the fixed
/// output capabilities.
pub fn compile(preset: &Preset, symbols: &SymbolTable) -> Result<CompiledPreset, Error> {
    let mut report = ValidationReport {
        preset: preset.name.clone(),
        ..Default::default()
    };
    let mut compiled = Vec::new();
    let mut seen_identities: Vec<(usize, Vec<(u16, u16, Option<u64>, Option<i32>)>)> = Vec::new();
    let mut hard_failure: Option<(usize, String)> = None;
    let mut record_hard = |report: &mut ValidationReport,
                           hard: &mut Option<(usize, String)>,
                           index: usize,
                           mapping: &Mapping,
                           reason: String| {
        report.issues.push(ValidationIssue {
            index,
            mapping: mapping.display_name(),
            reason: reason.clone(),
            disables_only: false,
        });
        if hard.is_none() {
            *hard = Some((index, reason));
        }
    };

    for (index, mapping) in preset.mappings.iter().enumerate() {
        // --- Combination shape ---
        if mapping.input_combination.is_empty() {
            record_hard(
                &mut report,
                &mut hard_failure,
                index,
                mapping,
                "empty input combination".into(),
            );
            continue;
        }
        let analog_count = mapping
            .input_combination
            .configs()
            .iter()
            .filter(|c| c.kind() == ConfigKind::Analog)
            .count();
        if analog_count > 1 {
            record_hard(
                &mut report,
                &mut hard_failure,
                index,
                mapping,
                "more than one analog-axis config in a combination".into(),
            );
            continue;
        }
        if let Some(bad) = mapping.input_combination.configs().iter().find(|c| {
            c.kind() == ConfigKind::Threshold
                && c.ty == crate::event::EV_ABS
                && c.analog_threshold.is_some_and(|t| !(-100..=100).contains(&t))
        }) {
            record_hard(
                &mut report,
                &mut hard_failure,
                index,
                mapping,
                format!(
                    "ABS threshold {} outside [-100, 100]",
                    bad.analog_threshold.unwrap_or(0)
                ),
            );
            continue;
        }

        // --- One mapping per combination ---
        let identity = mapping.input_combination.identity();
        if let Some((other, _)) = seen_identities.iter().find(|(_, id)| *id == identity) {
            record_hard(
                &mut report,
                &mut hard_failure,
                index,
                mapping,
                format!("duplicate combination (already mapped by record #{other})"),
            );
            continue;
        }
        seen_identities.push((index, identity));

        // --- Shaping bounds ---
        if let Some(reason) = shaping_error(mapping) {
            record_hard(&mut report, &mut hard_failure, index, mapping, reason);
            continue;
        }

        // --- Output classification ---
        let has_analog = analog_count == 1;
        let output = match classify_output(mapping, has_analog, symbols) {
            Ok(output) => output,
            Err(OutputError::Hard(reason)) => {
                record_hard(&mut report, &mut hard_failure, index, mapping, reason);
                continue;
            }
            Err(OutputError::MacroParse(err)) => {
                // Disable this mapping; the rest of the preset survives.
                tracing::warn!(
                    preset = %preset.name,
                    mapping = %mapping.display_name(),
                    %err,
                    "macro failed to parse, mapping disabled"
                );
                report.issues.push(ValidationIssue {
                    index,
                    mapping: mapping.display_name(),
                    reason: err.to_string(),
                    disables_only: true,
                });
                continue;
            }
        };

        // --- Axis pairing: abs->abs, abs->rel, rel->abs only ---
        if let CompiledOutput::Axis { ty, .. } = &output {
            let src_ty = mapping
                .analog_config()
                .map(|c| c.ty)
                .unwrap_or(crate::event::EV_ABS);
            let supported = matches!(
                (src_ty, *ty),
                (crate::event::EV_ABS, crate::event::EV_ABS)
                    | (crate::event::EV_ABS, crate::event::EV_REL)
                    | (crate::event::EV_REL, crate::event::EV_ABS)
            );
            if !supported {
                record_hard(
                    &mut report,
                    &mut hard_failure,
                    index,
                    mapping,
                    format!(
                        "unsupported axis translation {} -> {}",
                        crate::keys::type_name(src_ty),
                        crate::keys::type_name(*ty)
                    ),
                );
                continue;
            }
        }

        // --- Capability check ---
        match &output {
            CompiledOutput::Key { ty, code } | CompiledOutput::Axis { ty, code } => {
                if !uinputs::advertises(mapping.target_uinput, *ty, *code) {
                    record_hard(
                        &mut report,
                        &mut hard_failure,
                        index,
                        mapping,
                        format!(
                            "target `{}` does not advertise {} {}",
                            mapping.target_uinput.name(),
                            crate::keys::type_name(*ty),
                            crate::keys::code_name(*ty, *code)
                        ),
                    );
                    continue;
                }
            }
            CompiledOutput::Disabled | CompiledOutput::Macro(_) => {}
        }

        compiled.push(CompiledMapping {
            index,
            name: mapping.display_name(),
            combination: mapping.input_combination.clone(),
            target: mapping.target_uinput,
            output,
            shape: Shaping::from(mapping),
            release_combination_keys: mapping.release_combination_keys,
            key_sleep_ms: mapping.macro_key_sleep_ms,
        });
    }

    if let Some((index, reason)) = hard_failure {
        return Err(Error::InvalidPreset {
            preset: preset.name.clone(),
            index: Some(index),
            reason,
        });
    }
    if compiled.is_empty() && !preset.mappings.is_empty() {
        return Err(Error::InvalidPreset {
            preset: preset.name.clone(),
            index: None,
            reason: "every mapping failed to parse".into(),
        });
    }

    Ok(CompiledPreset {
        name: preset.name.clone(),
        group_key: preset.group_key.clone(),
        mappings: compiled,
        report,
    })
}

fn shaping_error(mapping: &Mapping) -> Option<String> {
    if !(0.0..1.0).contains(&mapping.deadzone) {
        return Some(format!("deadzone {} outside [0, 1)", mapping.deadzone));
    }
    if mapping.expo.abs() >= 1.0 {
        return Some(format!("expo {} outside (-1, 1)", mapping.expo));
    }
    if !mapping.gain.is_finite() {
        return Some(format!("gain {} is not finite", mapping.gain));
    }
    if mapping.rel_rate == 0 {
        return Some("rel_rate must be positive".into());
    }
    if mapping.rel_to_abs_input_cutoff <= 0.0 {
        return Some("rel_to_abs_input_cutoff must be positive".into());
    }
    if mapping.release_timeout_ms == 0 {
        return Some("release_timeout must be positive".into());
    }
    None
}

enum OutputError {
    Hard(String),
    MacroParse(Error),
}

fn classify_output(
    mapping: &Mapping,
    has_analog: bool,
    symbols: &SymbolTable,
) -> Result<CompiledOutput, OutputError> {
    if let Some(symbol) = &mapping.output_symbol {
        let trimmed = symbol.trim();
        if trimmed.eq_ignore_ascii_case("disable") {
            return Ok(CompiledOutput::Disabled);
        }
        if let Some((ty, code)) = symbols.lookup(trimmed) {
            return Ok(if has_analog {
                CompiledOutput::Axis { ty, code }
            } else {
                CompiledOutput::Key { ty, code }
            });
        }
        if has_analog {
            return Err(OutputError::Hard(
                "an analog combination needs an axis output, not a macro".into(),
            ));
        }
        return match parse(trimmed, symbols) {
            Ok(program) => Ok(CompiledOutput::Macro(Arc::new(program))),
            Err(err) => Err(OutputError::MacroParse(err)),
        };
    }
    match (mapping.output_type, mapping.output_code) {
        (Some(ty), Some(code)) => Ok(if has_analog {
            CompiledOutput::Axis { ty, code }
        } else {
            CompiledOutput::Key { ty, code }
        }),
        _ => Err(OutputError::Hard(
            "mapping has neither an output symbol nor a numeric output".into(),
        )),
    }
}
