//! Basic document inspection example
//!
//! This example demonstrates basic operations:
//! - Loading a PDF
//! - Reading structure and metadata
//! - Walking the page tree
//! - Resolving indirect objects
//!
//! Run with: cargo run --example inspect <pdf_file>

use pdf_delta::core::page::{flat_page_tree, page_layouts, paper};
use pdf_delta::PDFDocument;
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: cargo run --example inspect <pdf_file>");
        std::process::exit(1);
    };

    let mut doc = PDFDocument::load_file(path)?;

    println!("Document structure:");
    for (key, value) in doc.structure()? {
        println!("  {}: {}", key, value);
    }

    println!("\nMetadata:");
    for (key, value) in doc.metadata()? {
        if let Some(text) = value {
            println!("  {}: {}", key, text);
        }
    }

    println!("\nPages:");
    let tree = flat_page_tree(&mut doc)?;
    let layouts = page_layouts(&mut doc)?;
    for (i, ((num, _), (mediabox, rotate))) in tree.iter().zip(&layouts).enumerate() {
        println!(
            "  page {} -> object {}, {} rotate {}",
            i,
            num,
            paper(mediabox),
            rotate
        );
    }

    println!("\nObjects in use: {}", doc.in_use().len());
    for num in doc.in_use() {
        let entry = doc.index_entry(num).unwrap();
        println!("  {} gen {} version {} ({:?})", num, entry.o_gen, entry.o_ver, entry.kind);
    }

    Ok(())
}
