//! Branded HTML shell wrapped around AI-generated email bodies.

use handlebars::Handlebars;
use serde_json::json;

const SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{subject}}</title>
    <style>
        body { margin: 0; padding: 0; width: 100% !important; background-color: #f0f7ff; font-family: 'Inter', sans-serif; }
        .email-container { width: 100%; max-width: 640px; margin: 40px auto; background-color: #ffffff; border-radius: 12px; overflow: hidden; border: 1px solid #dee2e6; }
        .header { background-color: #005ea6; padding: 25px 30px; text-align: center; }
        .header h1 { margin: 10px 0 0 0; font-size: 26px; font-weight: 700; color: #ffffff; }
        .content { padding: 35px 40px; color: #333333; font-size: 16px; line-height: 1.7; }
        .content p { margin: 0 0 18px 0; }
        .content a { color: #007bff; text-decoration: underline; font-weight: 600; }
        .signature { margin-top: 25px; padding-top: 15px; border-top: 1px solid #dee2e6; }
        .signature p { margin: 0 0 5px 0; font-size: 15px; line-height: 1.5; font-weight: 600; color: #005ea6; }
        .signature .sender-title { font-size: 14px; color: #333333; font-weight: 400; }
        .footer { background-color: #f0f7ff; padding: 20px 30px; text-align: center; font-size: 13px; color: #777777; border-top: 1px solid #dee2e6; }
        @media only screen and (max-width: 640px) {
            .email-container { width: 95% !important; margin: 20px auto !important; border-radius: 8px; }
            .content { padding: 25px 20px; font-size: 15px; }
        }
    </style>
</head>
<body style="background-color: #f0f7ff;">
    <div class="email-container">
        <div class="header">
            <h1>{{brand}}</h1>
        </div>
        <div class="content">
            {{{body}}}
            <div class="signature">
                <p><strong>{{signer}}</strong></p>
                <p class="sender-title">{{brand}}</p>
            </div>
        </div>
        <div class="footer">
            <p style="margin:0;"><small>{{brand}}</small></p>
        </div>
    </div>
</body>
</html>
"#;

/// Wraps generated HTML in the standard layout. The body is inserted raw;
/// subject, signer and brand are escaped.
#[derive(Debug, Clone)]
pub struct EmailShell {
    brand: String,
    registry: Handlebars<'static>,
}

impl EmailShell {
    pub fn new(brand: impl Into<String>) -> Self {
        let mut registry = Handlebars::new();
        // The layout is a compile-time constant; registration cannot fail.
        let _ = registry.register_template_string("shell", SHELL);
        Self {
            brand: brand.into(),
            registry,
        }
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn wrap(&self, subject: &str, body_html: &str, signer: &str) -> String {
        let signer = if signer.trim().is_empty() { self.brand.as_str() } else { signer };
        let context = json!({
            "subject": subject,
            "body": body_html,
            "signer": signer,
            "brand": self.brand,
        });
        self.registry
            .render("shell", &context)
            .unwrap_or_else(|_| body_html.to_string())
    }
}
