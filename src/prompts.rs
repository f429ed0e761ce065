//! Recognition instructions.
//!
//! Every unit is sent with the same base instruction. Titles, figures and
//! tables get one extra paragraph that focuses the model on what matters for
//! that kind of region; text regions and unrecognised labels get the base
//! instruction unchanged.
//!
//! Callers can replace the base via
//! [`crate::config::PipelineConfig::system_prompt`]; the hints are appended
//! either way.

use crate::unit::Category;

/// Base instruction for transcribing one cropped page region to Markdown.
pub const BASE_INSTRUCTION: &str = r#"# Role
You are a professional OCR engine with strong layout understanding. Transcribe the attached image region faithfully into clean, coherent Markdown.

# Rules
1. CLEAN OUTPUT
   - Output ONLY the recognised content
   - No preamble ("Sure", "Here is the result"), no closing remarks, no explanations
   - Do NOT wrap the output in ```markdown fences

2. NOISE REMOVAL
   - Drop running headers, footers and page numbers
   - Drop scanner speckles and meaningless symbol runs
   - Ignore handwritten notes and doodles

3. LINE-BREAK REPAIR
   - Re-join English words hyphenated across a line break
   - Merge paragraphs broken by hard line breaks into one paragraph

4. STRUCTURE
   - Headings: use #, ##, ### according to visual size and level
   - Lists: use - or 1. as appropriate
   - Code: wrap in ```language fences
   - Formulas: LaTeX, $inline$ and $$display$$
   - Tables: standard Markdown tables

5. CORRECTION
   - Fix obvious recognition errors from context (e.g. "l" read as "1")
   - Never change the meaning of the original text"#;

/// Extra paragraph for table regions.
pub const TABLE_HINT: &str = "**Table region**: focus on the table structure and output a standard Markdown table.";

/// Extra paragraph for figure regions.
pub const FIGURE_HINT: &str = "**Figure region**: if this is a chart or diagram, briefly describe its content and structure, then extract all visible text.";

/// Extra paragraph for title regions.
pub const TITLE_HINT: &str = "**Title region**: this is a heading; transcribe it exactly and apply the correct Markdown heading level.";

/// Hint for a category, if it has one.
pub fn category_hint(category: Category) -> Option<&'static str> {
    match category {
        Category::Table => Some(TABLE_HINT),
        Category::Figure => Some(FIGURE_HINT),
        Category::Title => Some(TITLE_HINT),
        Category::Text => None,
    }
}

/// Build the instruction for a unit.
///
/// `category` is `None` for names outside the scheme; those use the base
/// instruction as-is.
pub fn instruction_for(category: Option<Category>, base: Option<&str>) -> String {
    let base = base.unwrap_or(BASE_INSTRUCTION);
    match category.and_then(category_hint) {
        Some(hint) => format!("{base}\n\n{hint}"),
        None => base.to_string(),
    }
}
