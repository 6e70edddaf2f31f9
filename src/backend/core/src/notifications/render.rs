//! Transition alert rendering.

use tera::{Context, Tera};

use super::MailMessage;
use crate::error::Result;
use crate::model::{EndpointStatus, TransitionEvent};

const TEXT_TEMPLATE: &str = "\
Monitor {{ endpoint_name }} changed status.

Target:   {{ target }}
Status:   {{ previous | upper }} -> {{ current | upper }}
At:       {{ occurred_at }}

{{ message }}
";

const HTML_TEMPLATE: &str = r#"<html>
<body>
<h2>Monitor {{ endpoint_name }} is {{ current | upper }}</h2>
<table>
<tr><td>Target</td><td>{{ target }}</td></tr>
<tr><td>Status</td><td>{{ previous | upper }} &rarr; {{ current | upper }}</td></tr>
<tr><td>At</td><td>{{ occurred_at }}</td></tr>
</table>
<p>{{ message }}</p>
</body>
</html>
"#;

/// Renders [`TransitionEvent`]s into mail. HTML output is auto-escaped.
#[derive(Debug, Clone)]
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("transition.txt", TEXT_TEMPLATE),
            ("transition.html", HTML_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    pub fn render(&self, event: &TransitionEvent, from: &str) -> Result<MailMessage> {
        let context = Context::from_serialize(event)?;
        Ok(MailMessage {
            from: from.to_string(),
            to: event.recipient.clone(),
            subject: subject(event),
            text_body: self.tera.render("transition.txt", &context)?,
            html_body: self.tera.render("transition.html", &context)?,
        })
    }
}

pub fn subject(event: &TransitionEvent) -> String {
    match event.current {
        EndpointStatus::Up => format!("Monitor UP: {}", event.endpoint_name),
        EndpointStatus::Down => format!("Monitor DOWN: {}", event.endpoint_name),
        other => format!("Monitor {}: {}", other.as_str().to_uppercase(), event.endpoint_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointId;
    use chrono::Utc;

    fn event(name: &str, current: EndpointStatus) -> TransitionEvent {
        TransitionEvent {
            endpoint_id: EndpointId::new(),
            endpoint_name: name.into(),
            target: "https://example.com".into(),
            previous: EndpointStatus::Up,
            current,
            recipient: "ops@example.com".into(),
            message: format!("{} (https://example.com) is now DOWN: timeout after 10000ms", name),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_subject() {
        assert_eq!(subject(&event("api", EndpointStatus::Down)), "Monitor DOWN: api");
        assert_eq!(subject(&event("api", EndpointStatus::Up)), "Monitor UP: api");
    }

    #[test]
    fn test_render_bodies() {
        let renderer = Renderer::new().unwrap();
        let mail = renderer.render(&event("api", EndpointStatus::Down), "alerts@monitra.local").unwrap();

        assert_eq!(mail.to, "ops@example.com");
        assert!(mail.text_body.contains("UP -> DOWN"));
        assert!(mail.text_body.contains("timeout after 10000ms"));
        assert!(mail.html_body.contains("<h2>Monitor api is DOWN</h2>"));
    }

    #[test]
    fn test_html_is_escaped() {
        let renderer = Renderer::new().unwrap();
        let mail = renderer
            .render(&event("<script>", EndpointStatus::Down), "alerts@monitra.local")
            .unwrap();

        assert!(mail.html_body.contains("&lt;script&gt;"));
        assert!(mail.text_body.contains("<script>"));
    }
}
