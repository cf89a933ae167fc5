//! The browser page that hosts Plaid Link.

use serde::Serialize;

use crate::config::Environment;

/// Path the page posts the Link outcome to.
pub const EXCHANGE_PATH: &str = "/exchange";

const PLAID_LINK_SCRIPT: &str = "https://cdn.plaid.com/link/v2/stable/link-initialize.js";

/// How the Link widget is initialized for one handshake.
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    pub client_name: String,
    pub environment: Environment,
    pub products: Vec<String>,
    pub link_token: String,
    /// Item being re-authorized; `None` links a new item.
    pub update_item: Option<String>,
}

impl WidgetConfig {
    pub fn is_update_mode(&self) -> bool {
        self.update_item.is_some()
    }
}

/// Values the page script reads. Embedded as JSON.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageConfig<'a> {
    link_token: &'a str,
    state: &'a str,
    exchange_path: &'a str,
}

pub(crate) fn render(widget: &WidgetConfig, state: &str) -> String {
    let config = PageConfig {
        link_token: &widget.link_token,
        state,
        exchange_path: EXCHANGE_PATH,
    };
    // serde_json never fails on this struct; "</" must not close the script tag.
    let config_json = serde_json::to_string(&config)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/");

    let mode = match widget.update_item {
        Some(ref item) => format!("Re-authorizing item <code>{}</code>", escape_html(item)),
        None => "Linking a new account".to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{name} - Plaid Link</title>
<script src="{script}"></script>
</head>
<body style="font-family: system-ui; text-align: center; padding: 50px; background: #f5f5f5;">
<div style="max-width: 480px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
<h1 style="margin-bottom: 10px;">{name}</h1>
<p style="color: #666;">{mode}</p>
<p style="color: #888; font-size: 14px;">Environment: {environment} &middot; Products: {products}</p>
<button id="link-button" style="padding: 10px 24px; font-size: 16px;">Link account</button>
<p id="status" style="color: #666; margin-top: 20px;"></p>
</div>
<script id="link-config" type="application/json">{config}</script>
<script>
(function () {{
  var config = JSON.parse(document.getElementById("link-config").textContent);
  var statusEl = document.getElementById("status");

  function report(body) {{
    body.state = config.state;
    return fetch(config.exchangePath, {{
      method: "POST",
      headers: {{ "Content-Type": "application/json" }},
      body: JSON.stringify(body)
    }});
  }}

  var handler = Plaid.create({{
    token: config.linkToken,
    onSuccess: function (public_token, metadata) {{
      statusEl.textContent = "Finishing up...";
      report({{ public_token: public_token }}).then(function () {{
        statusEl.textContent = "Account linked. You can close this window and return to the terminal.";
      }});
    }},
    onExit: function (err, metadata) {{
      var body = err
        ? {{ error_code: err.error_code, error_message: err.display_message || err.error_message }}
        : {{ error_code: "USER_EXIT", error_message: "Plaid Link was closed before finishing" }};
      report(body).then(function () {{
        statusEl.textContent = "Linking did not complete. You can close this window.";
      }});
    }}
  }});

  document.getElementById("link-button").onclick = function () {{ handler.open(); }};
  handler.open();
}})();
</script>
</body>
</html>
"#,
        name = escape_html(&widget.client_name),
        script = PLAID_LINK_SCRIPT,
        mode = mode,
        environment = widget.environment,
        products = escape_html(&widget.products.join(", ")),
        config = config_json,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(update_item: Option<&str>) -> WidgetConfig {
        WidgetConfig {
            client_name: "plaid-cli".to_string(),
            environment: Environment::Sandbox,
            products: vec!["transactions".to_string()],
            link_token: "link-sandbox-123".to_string(),
            update_item: update_item.map(String::from),
        }
    }

    #[test]
    fn test_render_embeds_link_token_and_state() {
        let html = render(&widget(None), "nonce123");
        assert!(html.contains(r#""linkToken":"link-sandbox-123""#));
        assert!(html.contains(r#""state":"nonce123""#));
        assert!(html.contains(r#""exchangePath":"/exchange""#));
        assert!(html.contains(PLAID_LINK_SCRIPT));
        assert!(html.contains("Linking a new account"));
    }

    #[test]
    fn test_render_update_mode_names_item() {
        let html = render(&widget(Some("item-<1>")), "nonce");
        assert!(html.contains("Re-authorizing item <code>item-&lt;1&gt;</code>"));
    }

    #[test]
    fn test_render_cannot_close_script_tag() {
        let mut w = widget(None);
        w.link_token = "</script><script>alert(1)</script>".to_string();
        let html = render(&w, "nonce");
        assert!(!html.contains("</script><script>alert(1)"));
    }
}
