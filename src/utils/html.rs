// src/utils/html.rs

/// Sanitizes admin-authored quiz descriptions.
///
/// Keeps harmless markup such as <b> or <p>, strips <script>, <iframe> and
/// event-handler attributes together with their content.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_keeps_formatting() {
        let cleaned = clean_html("<p>Read <b>carefully</b></p><script>alert(1)</script>");

        assert_eq!(cleaned, "<p>Read <b>carefully</b></p>");
    }

    #[test]
    fn strips_event_handlers() {
        let cleaned = clean_html(r#"<a href="https://example.com" onclick="steal()">link</a>"#);

        assert!(!cleaned.contains("onclick"));
        assert!(cleaned.contains("link"));
    }
}
