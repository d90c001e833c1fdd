//! Static checks over a screen's handlers, run before anything executes.

use serde::Serialize;

use weft_core::{ActionKind, EventHandler, Screen};
use weft_datasource::DataSourceRegistry;

use crate::config::DispatcherConfig;

/// One problem found in a screen definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Top-level handler name the problem was found under.
    pub handler: String,
    pub message: String,
}

/// Check every handler of `screen`: network kinds need a data source
/// that resolves, nesting must stay within `max_depth`, and UI kinds need
/// their target parameter.
pub fn check_screen(
    screen: &Screen,
    registry: &DataSourceRegistry,
    config: &DispatcherConfig,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, handler) in &screen.handlers {
        if handler.depth() > config.max_depth {
            findings.push(Finding {
                handler: name.clone(),
                message: format!(
                    "nesting depth {} exceeds the limit of {}",
                    handler.depth(),
                    config.max_depth
                ),
            });
        }
        let mut messages = Vec::new();
        check_handler(handler, screen, registry, &mut messages);
        findings.extend(messages.into_iter().map(|message| Finding {
            handler: name.clone(),
            message,
        }));
    }
    findings
}

fn check_handler(
    handler: &EventHandler,
    screen: &Screen,
    registry: &DataSourceRegistry,
    out: &mut Vec<String>,
) {
    let kind = handler.action;
    match &handler.data_source_id {
        None if kind.requires_data_source() => out.push(format!("{kind} requires a dataSourceId")),
        Some(id) if registry.find(id, &screen.data_sources).is_err() => {
            out.push(format!("{kind} references unknown data source '{id}'"));
        }
        _ => {}
    }

    let missing = |keys: &[&str]| keys.iter().all(|k| handler.param(k).is_none());
    match kind {
        ActionKind::Navigation if missing(&["href", "path", "url", "to"]) => {
            out.push("navigation requires an href".into());
        }
        ActionKind::OpenModal | ActionKind::CloseModal if missing(&["modalId", "modal", "id"]) => {
            out.push(format!("{kind} requires a modalId"));
        }
        ActionKind::UpdateState if missing(&["path", "statePath", "key"]) => {
            out.push("update_state requires a path".into());
        }
        ActionKind::RunScript if missing(&["script", "code"]) => {
            out.push("run_script requires a script".into());
        }
        _ => {}
    }

    for child in handler
        .before
        .iter()
        .chain(&handler.success)
        .chain(&handler.error)
        .chain(&handler.finally)
    {
        check_handler(child, screen, registry, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::DataSource;

    fn screen(handlers: &[(&str, EventHandler)]) -> Screen {
        let mut screen = Screen::default();
        screen.data_sources.push(DataSource::new("local", "/local"));
        for (name, handler) in handlers {
            screen.handlers.insert((*name).to_owned(), handler.clone());
        }
        screen
    }

    #[test]
    fn clean_screen_has_no_findings() {
        let mut registry = DataSourceRegistry::default();
        registry.register(DataSource::new("todos", "/todos"));
        let s = screen(&[
            ("save", EventHandler::new(ActionKind::CrudCreate).with_data_source("todos")),
            ("load", EventHandler::new(ActionKind::ApiCall).with_data_source("local")),
        ]);
        assert!(check_screen(&s, &registry, &DispatcherConfig::default()).is_empty());
    }

    #[test]
    fn reports_nested_problems_under_the_top_level_name() {
        let registry = DataSourceRegistry::default();
        let handler = EventHandler::new(ActionKind::ApiCall)
            .with_data_source("missing")
            .on_success(EventHandler::new(ActionKind::CrudDelete))
            .finally(EventHandler::new(ActionKind::Navigation).with_param("replace", json!(true)));
        let findings = check_screen(
            &screen(&[("submit", handler)]),
            &registry,
            &DispatcherConfig::default(),
        );

        let messages: Vec<&str> = findings.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "api_call references unknown data source 'missing'",
                "crud_delete requires a dataSourceId",
                "navigation requires an href",
            ]
        );
        assert!(findings.iter().all(|f| f.handler == "submit"));
    }

    #[test]
    fn reports_excessive_nesting() {
        let mut handler = EventHandler::new(ActionKind::Toast).with_param("message", json!("x"));
        for _ in 0..3 {
            handler = EventHandler::new(ActionKind::Toast)
                .with_param("message", json!("x"))
                .on_success(handler);
        }
        let config = DispatcherConfig {
            max_depth: 2,
            ..DispatcherConfig::default()
        };
        let findings = check_screen(
            &screen(&[("deep", handler)]),
            &DataSourceRegistry::default(),
            &config,
        );
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("exceeds the limit of 2"));
    }
}
