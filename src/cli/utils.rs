use serde_json::{json, Value};

use crate::catalog::PageState;
use crate::cli::OutputFormat;
use crate::models::{Registration, Training};

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            match data {
                Some(Value::Object(fields)) => {
                    if let Some(object) = response.as_object_mut() {
                        object.extend(fields);
                    }
                }
                Some(other) => response["data"] = other,
                None => {}
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(output_format: &OutputFormat, message: &str, error_code: Option<&str>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

fn page_footer<T>(state: &PageState<T>) -> String {
    format!("page {} of {} ({} total)", state.page, state.total_pages().max(1), state.total)
}

pub fn output_trainings(output_format: &OutputFormat, state: &PageState<Training>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(state)?),
        OutputFormat::Text => {
            if state.items.is_empty() {
                println!("No trainings found");
            }
            for t in &state.items {
                let status = t.user_registration_status.map(|s| format!(" [{}]", s)).unwrap_or_default();
                println!(
                    "{:>5}  {}  {}  {}/{} confirmed  {}{}",
                    t.id,
                    t.start_date_time.format("%Y-%m-%d %H:%M"),
                    t.name,
                    t.confirmed_count,
                    t.capacity,
                    t.location,
                    status
                );
            }
            println!("{}", page_footer(state));
        }
    }
    Ok(())
}

pub fn output_registrations(output_format: &OutputFormat, state: &PageState<Registration>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(state)?),
        OutputFormat::Text => {
            if state.items.is_empty() {
                println!("No registrations found");
            }
            for r in &state.items {
                println!(
                    "{:>5}  {:<9}  {}  {} <{}>",
                    r.id, r.status.as_str(), r.training_name, r.user_name, r.user_email
                );
            }
            println!("{}", page_footer(state));
        }
    }
    Ok(())
}
