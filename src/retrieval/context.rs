//! Formatting retrieved documents into a size-bounded context string.

use super::index::Document;

/// What a vector index holds, which decides how its documents are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Corpus {
    #[default]
    CodeExamples,
    Documentation,
}

impl Corpus {
    pub fn empty_message(&self) -> &'static str {
        match self {
            Corpus::CodeExamples => "No relevant code examples found for the query.",
            Corpus::Documentation => "No relevant documentation found for the query.",
        }
    }
}

/// Render one document as a self-contained block. `position` is 1-based.
pub fn format_block(corpus: Corpus, position: usize, document: &Document) -> String {
    match corpus {
        Corpus::CodeExamples => format_code_block(position, document),
        Corpus::Documentation => format_doc_block(position, document),
    }
}

fn format_code_block(position: usize, document: &Document) -> String {
    let path = document.meta_str("file_path").unwrap_or("unknown");
    let symbol = document
        .meta_str("function_name")
        .or_else(|| document.meta_str("class_name"))
        .unwrap_or("(anonymous)");
    let source = document
        .meta_str("source_code")
        .unwrap_or(document.content.as_str());

    let mut block = format!("### Example {position}: {symbol}\n");
    match document.meta_i64("line_number") {
        Some(line) => block.push_str(&format!("File: {path}:{line}\n")),
        None => block.push_str(&format!("File: {path}\n")),
    }
    if let Some(description) = document.meta_str("description") {
        block.push_str(&format!("Description: {description}\n"));
    }
    block.push_str("```python\n");
    block.push_str(source.trim_end());
    block.push_str("\n```\n\n");
    block
}

fn format_doc_block(position: usize, document: &Document) -> String {
    let title = document
        .meta_str("title")
        .or_else(|| document.meta_str("section"))
        .unwrap_or("Untitled");
    let source = document
        .meta_str("source")
        .or_else(|| document.meta_str("file_path"))
        .unwrap_or("unknown");

    format!(
        "### {position}. {title}\nSource: {source}\n\n{}\n\n",
        document.content.trim_end()
    )
}

/// Outcome of packing blocks into the size budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Documents whose blocks made it in, always a prefix of the input
    pub included: usize,
    pub omitted: usize,
}

/// Append blocks in order until the next one would push the total past
/// `max_size` characters. Blocks are never cut.
pub fn assemble<'a>(
    corpus: Corpus,
    documents: impl IntoIterator<Item = &'a Document>,
    max_size: usize,
) -> AssembledContext {
    let mut text = String::new();
    let mut size = 0;
    let mut included = 0;
    let mut omitted = 0;

    for document in documents {
        if omitted > 0 {
            omitted += 1;
            continue;
        }
        let block = format_block(corpus, included + 1, document);
        let block_size = block.chars().count();
        if size + block_size > max_size {
            omitted += 1;
            continue;
        }
        text.push_str(&block);
        size += block_size;
        included += 1;
    }

    AssembledContext {
        text,
        included,
        omitted,
    }
}
