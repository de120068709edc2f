//! Interactive address prompt for devices without a usable default address

use super::output::{style, PLUG};
use crate::core::DeviceDescriptor;
use crate::device::AddressResolver;
use console::Term;
use tracing::warn;

/// Asks on the terminal. An empty answer falls back to the descriptor's
/// default address, if there is one.
pub struct ConsolePrompt {
    term: Term,
}

impl ConsolePrompt {
    /// A prompt on stderr, or `None` when it is not an interactive terminal
    pub fn interactive() -> Option<Self> {
        let term = Term::stderr();
        term.is_term().then_some(Self { term })
    }
}

impl AddressResolver for ConsolePrompt {
    fn resolve(&self, device: &str, descriptor: &DeviceDescriptor) -> Option<String> {
        let connection: String = descriptor.connection.clone().into();
        let mut question = format!(
            "{} Address for {} ({}, driver {})",
            PLUG,
            style(device).bold(),
            connection,
            descriptor.driver
        );
        if let Some(default) = &descriptor.default_address {
            question.push_str(&format!(" [{}]", default));
        }
        question.push_str(": ");

        if let Err(e) = self.term.write_str(&question) {
            warn!("Could not prompt for {}: {}", device, e);
            return None;
        }
        match self.term.read_line() {
            Ok(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
            Ok(_) => descriptor.default_address.clone(),
            Err(e) => {
                warn!("Could not read address for {}: {}", device, e);
                None
            }
        }
    }
}
