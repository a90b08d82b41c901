//! Human-readable MIDI port listing for the CLI

use colored::*;

use crate::midi::list_output_ports;

/// Print available MIDI output ports
///
/// `preferred` is the configured `output_port` pattern, if any; the first
/// matching port is highlighted the way the bridge would pick it.
pub fn list_ports_formatted(preferred: Option<&str>) {
    println!("\n{}", "=== Available MIDI Output Ports ===".bold().cyan());

    let outputs = match list_output_ports() {
        Ok(outputs) => outputs,
        Err(e) => {
            println!("  {}", format!("Failed to enumerate ports: {}", e).red());
            return;
        }
    };

    if outputs.is_empty() {
        println!("  {}", "No output ports found".dimmed());
    }

    let selected = preferred.and_then(|pattern| select_port(&outputs, pattern));
    for (idx, name) in outputs.iter().enumerate() {
        if Some(idx) == selected {
            println!("  {} {}", "[SELECTED]".green(), name.bright_white());
        } else {
            println!("  {} {}", "[PORT]".yellow(), name);
        }
    }

    if let (Some(pattern), None) = (preferred, selected) {
        println!(
            "\n  {} no port matches '{}'; a virtual port will be created",
            "Note:".bold(),
            pattern
        );
    }

    println!();
}

/// Index of the first port containing `pattern`, ignoring case
fn select_port(ports: &[String], pattern: &str) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    ports
        .iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_port_is_case_insensitive() {
        let ports = vec!["IAC Driver Bus 1".to_string(), "X-Touch MIDI".to_string()];
        assert_eq!(select_port(&ports, "x-touch"), Some(1));
        assert_eq!(select_port(&ports, "iac"), Some(0));
        assert_eq!(select_port(&ports, "missing"), None);
    }
}
