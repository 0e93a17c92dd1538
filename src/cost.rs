//! Credit cost accounting.
//!
//! Pricing is a static per-model table of credit rates. `calculate` is pure;
//! the final charge for a generation is assembled exactly once, from the
//! ledger, after the stream has truly ended.

use crate::types::{CostLedger, CreditCount, Model};
use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Credit rates for one model. Token rates are credits per token; `per_call`
/// covers flat-rate operations such as image generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub per_call: f64,
}

lazy_static! {
    static ref PRICING: HashMap<&'static str, ModelPricing> = {
        let mut table = HashMap::new();
        table.insert("gpt-4o", ModelPricing { input: 2.5, output: 10.0, per_call: 0.0 });
        table.insert("gpt-4o-mini", ModelPricing { input: 0.15, output: 0.6, per_call: 0.0 });
        table.insert("gpt-4-turbo", ModelPricing { input: 10.0, output: 30.0, per_call: 0.0 });
        table.insert("gpt-4", ModelPricing { input: 30.0, output: 60.0, per_call: 0.0 });
        table.insert("gpt-3.5-turbo", ModelPricing { input: 0.5, output: 1.5, per_call: 0.0 });
        table.insert("claude-3-5-sonnet-latest", ModelPricing { input: 3.0, output: 15.0, per_call: 0.0 });
        table.insert("claude-3-5-haiku-latest", ModelPricing { input: 0.8, output: 4.0, per_call: 0.0 });
        table.insert("claude-3-opus-20240229", ModelPricing { input: 15.0, output: 75.0, per_call: 0.0 });
        table.insert("claude-3-haiku-20240307", ModelPricing { input: 0.25, output: 1.25, per_call: 0.0 });
        table.insert("command-r-plus", ModelPricing { input: 2.5, output: 10.0, per_call: 0.0 });
        table.insert("command-r", ModelPricing { input: 0.15, output: 0.6, per_call: 0.0 });
        table.insert("command", ModelPricing { input: 1.0, output: 2.0, per_call: 0.0 });
        table.insert("command-light", ModelPricing { input: 0.3, output: 0.6, per_call: 0.0 });
        table.insert("dall-e-3", ModelPricing { input: 0.0, output: 0.0, per_call: 40000.0 });
        table.insert("dall-e-2", ModelPricing { input: 0.0, output: 0.0, per_call: 20000.0 });
        table.insert("text-embedding-3-small", ModelPricing { input: 0.02, output: 0.0, per_call: 0.0 });
        table.insert("text-embedding-3-large", ModelPricing { input: 0.13, output: 0.0, per_call: 0.0 });
        table
    };
}

fn pricing_for(model: &Model) -> ModelPricing {
    match PRICING.get(model.as_str()) {
        Some(pricing) => *pricing,
        None => {
            warn!(model = %model, "no pricing entry, billing zero");
            ModelPricing::default()
        }
    }
}

/// Credits for a token count in one direction. Linear in `tokens` and never
/// negative; an unpriced model bills zero.
pub fn calculate(tokens: u64, model: &Model, direction: Direction) -> CreditCount {
    let pricing = pricing_for(model);
    let rate = match direction {
        Direction::Input => pricing.input,
        Direction::Output => pricing.output,
    };
    CreditCount::new(tokens as f64 * rate)
}

/// Flat per-invocation charge (image generation).
pub fn flat_call_cost(model: &Model) -> CreditCount {
    CreditCount::new(pricing_for(model).per_call)
}

/// The single final charge for a generation: input plus output plus tool
/// cost. Workspace-key generations bill zero, checked before anything else.
pub fn final_cost(ledger: &CostLedger, model: &Model, custom_key: bool) -> CreditCount {
    if custom_key {
        return CreditCount::zero();
    }

    let input = calculate(ledger.usage.input_tokens, model, Direction::Input);
    let output = calculate(ledger.usage.output_tokens, model, Direction::Output);
    input.add(output).add(ledger.tool_cost)
}
