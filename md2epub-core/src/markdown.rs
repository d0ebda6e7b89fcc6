use std::sync::LazyLock;

use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::contract::{ChapterMeta, Conversion, ConvertError, Converter};

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEMES: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const HIGHLIGHT_THEME: &str = "base16-mocha.dark";
const TAB_WIDTH: usize = 2;

/// Default [`Converter`]: YAML front-matter plus CommonMark with tables, footnotes,
/// strikethrough and task lists, rendered as XHTML. Fenced code blocks in a known
/// language are syntax highlighted with inline styles and line numbers.
#[derive(Debug, Clone)]
pub struct MarkdownConverter {
    options: Options,
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        Self { options }
    }
}

impl MarkdownConverter {
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

impl Converter for MarkdownConverter {
    fn convert(&self, source: &str) -> Result<Conversion, ConvertError> {
        let (front_matter, body) = split_front_matter(source);
        let meta = match front_matter {
            Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str::<ChapterMeta>(yaml)
                .map_err(|e| ConvertError::Metadata(e.to_string()))?,
            _ => ChapterMeta::default(),
        };

        let events = highlight_code_blocks(Parser::new_ext(body, self.options))?;
        let mut markup = String::with_capacity(body.len() * 3 / 2);
        html::push_html(&mut markup, events.into_iter());

        Ok(Conversion {
            markup: to_xhtml(markup),
            meta,
        })
    }
}

/// Split a leading `---` delimited YAML block from the document body.
///
/// Returns `(None, source)` when the document has no front-matter. An unterminated
/// block is treated as body text.
pub fn split_front_matter(source: &str) -> (Option<&str>, &str) {
    let text = source.strip_prefix('\u{feff}').unwrap_or(source);
    let Some(rest) = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))
    else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

struct FencedBlock {
    syntax: &'static SyntaxReference,
    source: String,
}

/// Replace fenced blocks whose language syntect knows with pre-rendered HTML; any
/// other code block passes through as plain `<pre><code>`.
fn highlight_code_blocks<'e>(
    parser: impl Iterator<Item = Event<'e>>,
) -> Result<Vec<Event<'e>>, ConvertError> {
    let mut events = Vec::new();
    let mut block: Option<FencedBlock> = None;
    for event in parser {
        if let Some(current) = block.as_mut() {
            match event {
                Event::Text(text) => current.source.push_str(&text),
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(done) = block.take() {
                        events.push(Event::Html(highlight(done.syntax, &done.source)?.into()));
                    }
                }
                _ => {}
            }
            continue;
        }
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(ref info))) => {
                match find_syntax(info) {
                    Some(syntax) => {
                        block = Some(FencedBlock {
                            syntax,
                            source: String::new(),
                        })
                    }
                    None => events.push(event),
                }
            }
            other => events.push(other),
        }
    }
    Ok(events)
}

/// Language token of a fence info string such as `rust,ignore` or `js title="x"`.
fn find_syntax(info: &str) -> Option<&'static SyntaxReference> {
    let token = info.split([',', ' ']).next().unwrap_or_default().trim();
    if token.is_empty() {
        return None;
    }
    SYNTAXES.find_syntax_by_token(token)
}

fn highlight(syntax: &SyntaxReference, source: &str) -> Result<String, ConvertError> {
    let theme = THEMES
        .themes
        .get(HIGHLIGHT_THEME)
        .ok_or_else(|| ConvertError::Markup(format!("missing theme {HIGHLIGHT_THEME}")))?;
    let failed = |e: syntect::Error| ConvertError::Markup(format!("highlighting failed: {e}"));

    let background = theme
        .settings
        .background
        .map(|c| format!("background-color:#{:02x}{:02x}{:02x};", c.r, c.g, c.b))
        .unwrap_or_default();
    let mut html = format!(
        "<pre class=\"highlight\" style=\"{background}white-space:pre-wrap;\"><code>"
    );

    let source = source.replace('\t', &" ".repeat(TAB_WIDTH));
    let mut highlighter = HighlightLines::new(syntax, theme);
    for (i, line) in LinesWithEndings::from(&source).enumerate() {
        let ranges = highlighter.highlight_line(line, &SYNTAXES).map_err(failed)?;
        let styled = styled_line_to_highlighted_html(&ranges, IncludeBackground::No).map_err(failed)?;
        html.push_str(&format!("<span class=\"ln\">{:>3} </span>{styled}", i + 1));
    }
    html.push_str("</code></pre>\n");
    Ok(html)
}

/// Raw HTML passes through untouched; void `<br>` tags must be closed for XHTML.
fn to_xhtml(markup: String) -> String {
    if markup.contains("<br>") {
        markup.replace("<br>", "<br />")
    } else {
        markup
    }
}
