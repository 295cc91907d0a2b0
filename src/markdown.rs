use pulldown_cmark::{Event, Options, Parser, TagEnd};

/// Flattens inline markdown (emphasis, code spans, links) to the plain text a
/// terminal listing shows. Block structure collapses onto one line.
pub fn to_plain_text(content: &str) -> String {
    let text = Parser::new_ext(content, Options::ENABLE_STRIKETHROUGH).fold(
        String::new(),
        |mut text, event| {
            match event {
                Event::Text(t) | Event::Code(t) | Event::InlineHtml(t) => text.push_str(&t),
                Event::SoftBreak | Event::HardBreak | Event::End(TagEnd::Paragraph) => {
                    text.push(' ')
                }
                _ => {}
            }
            text
        },
    );
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
