//! Incremental update example
//!
//! Adds a text annotation to the first page and writes the result as an
//! incremental update: the original bytes stay untouched and one new
//! revision is appended.
//!
//! Run with: cargo run --example annotate <in.pdf> <out.pdf>

use pdf_delta::PDFDocument;
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let (Some(input), Some(output)) = (args.get(1), args.get(2)) else {
        eprintln!("Usage: cargo run --example annotate <in.pdf> <out.pdf>");
        std::process::exit(1);
    };

    let mut doc = PDFDocument::load_file(input)?;
    println!("loaded {} with {} revision(s)", input, doc.updates());

    let mut doc = doc.add_text_annotation(
        0,
        "Reviewed with pdf-delta",
        [50.0, 700.0, 250.0, 740.0],
    )?;
    println!("staged changes: {:?}", doc.changes());

    let doc = doc.save_file(output)?;
    println!("wrote {} with {} revision(s)", output, doc.updates());
    Ok(())
}
