//! HTML pages served by the HTTP surface.

use crate::{address_set::Address, rates::currencies::CurrencyTable};

const STYLE: &str = r#"
  body { font-family: sans-serif; max-width: 32rem; margin: 2rem auto; padding: 0 1rem; }
  .address { font-family: monospace; word-break: break-all; }
  .currencies a { display: inline-block; margin: 0.2rem; padding: 0.3rem 0.5rem; border: 1px solid #ccc; border-radius: 4px; text-decoration: none; color: inherit; }
  .currencies a.selected { background: #0ac18e; color: #fff; border-color: #0ac18e; }
"#;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{style}</style>
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape_html(title),
        style = STYLE,
        body = body,
    )
}

/// Landing page: scan an address QR code and jump to its subscribe page.
pub fn scan_page() -> String {
    layout(
        "Payment alerts",
        r#"<h1>Payment alerts</h1>
<p>Scan or paste the address you want to be notified about.</p>
<form onsubmit="location.href = '/' + encodeURIComponent(this.address.value.trim()); return false;">
  <input name="address" placeholder="bitcoincash:q..." size="48" autofocus>
  <button type="submit">Subscribe</button>
</form>
<video id="preview" playsinline style="width: 100%; display: none"></video>"#,
    )
}

/// Subscribe page: registers this device for push alerts on `address` and
/// plays spoken alerts while open.
pub fn subscribe_page(address: &Address, app_id: &str, currency: &str) -> String {
    let address_html = escape_html(address.as_str());
    let body = format!(
        r#"<h1>Payment alerts</h1>
<p class="address">{address}</p>
<p>Amounts shown in <strong>{currency}</strong> (<a href="/select-currency/{address}">change</a>)</p>
<script src="https://cdn.onesignal.com/sdks/OneSignalSDK.js" async></script>
<script>
  var OneSignal = window.OneSignal || [];
  OneSignal.push(function() {{
    OneSignal.init({{ appId: "{app_id}" }});
    OneSignal.sendTag("bchAddress", "{address}");
  }});
  var socket = new WebSocket((location.protocol === "https:" ? "wss://" : "ws://") + location.host + "/listen-tx/{address}");
  socket.onmessage = function(event) {{ new Audio(event.data).play(); }};
</script>"#,
        address = address_html,
        currency = escape_html(currency),
        app_id = escape_html(app_id),
    );
    layout("Payment alerts", &body)
}

/// Currency picker for `address`, highlighting `selected`.
pub fn select_currency_page(address: &Address, selected: Option<&str>, currencies: &CurrencyTable) -> String {
    let address_html = escape_html(address.as_str());
    let links: Vec<String> = currencies
        .known_codes()
        .map(|code| {
            let symbol = currencies.symbol_for(code).unwrap_or(code);
            let class = if selected == Some(code) { r#" class="selected""# } else { "" };
            format!(
                r#"<a href="/select-currency/{address}/{code}"{class}>{code}&nbsp;({symbol})</a>"#,
                address = address_html,
                code = code,
                class = class,
                symbol = escape_html(symbol),
            )
        })
        .collect();

    let body = format!(
        r#"<h1>Select currency</h1>
<p class="address"><a href="/{address}">{address}</a></p>
<div class="currencies">
{links}
</div>"#,
        address = address_html,
        links = links.join("\n"),
    );
    layout("Select currency", &body)
}
