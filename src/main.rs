use pdf_delta::core::parser::parse_objstm;
use pdf_delta::core::xref::{xref_stream_records, XrefRecordKind};
use pdf_delta::core::{hexdump, scan_regions, share, FileProvider};
use pdf_delta::{PDFDocument, PDFError, PDFObject, Region};
use std::env;
use std::path::Path;
use std::process;

fn usage(program: &str) -> ! {
    eprintln!("PDF object-level inspector and editor");
    eprintln!("Usage: {} <command> <pdf-file> [options]", program);
    eprintln!("\nCommands:");
    eprintln!("  overview FILE             Print structure and metadata");
    eprintln!("  disasm FILE               One line per file region / xref entry");
    eprintln!("  hexdump FILE              Canonical hex+ASCII dump");
    eprintln!("  compress FILE -o OUT      Squash + object streams + Flate + xref stream");
    eprintln!("  rotate FILE DEGREES -o OUT  Rotate all pages (incremental update)");
    process::exit(1);
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }
    let command = args[1].as_str();
    let path = args[2].as_str();
    if !Path::new(path).exists() {
        eprintln!("Error: file not found: {}", path);
        process::exit(1);
    }

    let result = match command {
        "overview" => overview(path),
        "disasm" => disasm(path),
        "hexdump" => dump(path),
        "compress" => compress(path, output_arg(&args)),
        "rotate" => rotate(path, &args),
        _ => usage(&args[0]),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Extracts the value following `-o`.
fn output_arg(args: &[String]) -> Option<String> {
    args.iter()
        .position(|a| a == "-o")
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn overview(path: &str) -> Result<(), PDFError> {
    let mut doc = PDFDocument::load_file(path)?;
    let structure = doc.structure()?;
    let encrypted = doc.encrypted()?;
    println!("# Structure");
    for (key, value) in &structure {
        println!("{}: {}", key, value);
    }
    println!("\n# Metadata");
    for (key, value) in doc.metadata()? {
        match value {
            Some(_) if encrypted => println!("{}: #Encrypted#", key),
            Some(text) => println!("{}: {}", key, text),
            None => println!("{}: None", key),
        }
    }
    Ok(())
}

/// Short codes for the filters of a stream, e.g. `_Flate`.
fn filters_in_line(dict: &pdf_delta::Dict) -> String {
    let names: Vec<&str> = match dict.get("/Filter") {
        Some(PDFObject::Name(n)) => vec![n.as_str()],
        Some(PDFObject::Array(items)) => {
            items.iter().filter_map(|o| o.as_name()).collect()
        }
        _ => return String::new(),
    };
    let mut out = String::new();
    for name in names {
        out.push('_');
        out.push_str(match name {
            "/ASCIIHexDecode" => "AHex",
            "/ASCII85Decode" => "A85",
            "/LZWDecode" => "LZW",
            "/FlateDecode" => "Flate",
            "/RunLengthDecode" => "RunL",
            "/CCITTFaxDecode" => "Fax",
            "/JBIG2Decode" => "JBIG2",
            "/DCTDecode" => "DCT",
            "/JPXDecode" => "JPX",
            "/Crypt" => "Crypt",
            _ => "?",
        });
    }
    out
}

/// Leading dictionary keys worth showing on a disasm line.
fn keys_in_line(dict: &pdf_delta::Dict) -> String {
    let mut out = String::new();
    if let Some(t) = dict.get("/Type").and_then(|o| o.as_name()) {
        out.push_str(&format!("{}  ", t));
    }
    for key in ["/Root", "/Prev", "/N", "/First", "/Size"] {
        match dict.get(key) {
            Some(PDFObject::Integer(i)) => out.push_str(&format!("{}={}  ", key, i)),
            Some(PDFObject::Reference { num, gen }) => {
                out.push_str(&format!("{}={},{}  ", key, num, gen))
            }
            _ => {}
        }
    }
    out
}

fn disasm(path: &str) -> Result<(), PDFError> {
    let provider = share(FileProvider::open(path)?);
    let data = provider.borrow_mut().read_all()?;
    let regions = scan_regions(&data)?;
    for region in &regions {
        let pos = region.start();
        let size = region.end() - region.start();
        match region {
            Region::Header { version, .. } => {
                println!("+ {:010} [{:6}] header    %PDF-{}", pos, size, version);
            }
            Region::Eof { .. } => {
                println!("+ {:010} [{:6}] comment   %%EOF", pos, size);
            }
            Region::Comment { start, end } => {
                let text = String::from_utf8_lossy(&data[*start..(*end).min(start + 10)]);
                println!("+ {:010} [{:6}] comment   {}", pos, size, text);
            }
            Region::Startxref { offset, .. } => {
                println!("+ {:010} [{:6}] startxref -> {:010}", pos, size, offset);
            }
            Region::IndirectObject {
                num, gen, object, ..
            } => {
                let (cl, detail) = match object {
                    PDFObject::Stream(s) => {
                        let ratio = match s.decoded.data() {
                            Some(d) if !d.is_empty() => {
                                format!("{}%", s.encoded.len() * 100 / d.len())
                            }
                            _ => String::new(),
                        };
                        (
                            "stream",
                            format!(
                                "{:4} {:8} {}",
                                ratio,
                                filters_in_line(&s.entries),
                                keys_in_line(&s.entries)
                            ),
                        )
                    }
                    PDFObject::Dictionary(d) => ("dict", keys_in_line(d)),
                    PDFObject::Array(_) => ("array", String::new()),
                    PDFObject::Integer(_) => ("int", String::new()),
                    _ => ("other", String::new()),
                };
                println!(
                    "+ {:010} [{:6}] ind_obj   {},{} {} {}",
                    pos, size, num, gen, cl, detail
                );
                if let PDFObject::Stream(s) = object {
                    match s.entries.get("/Type").and_then(|o| o.as_name()) {
                        // Expand xref streams into one row per record
                        Some("/XRef") => {
                            if let Ok(records) = xref_stream_records(s) {
                                for record in records {
                                    let (addr_mode, addr, cl) = match record.kind {
                                        XrefRecordKind::InUse { offset } => {
                                            ("abs".to_string(), offset, "inuse")
                                        }
                                        XrefRecordKind::Embedded { env, pos } => {
                                            (format!("{},", env), pos as u64, "inuse")
                                        }
                                        XrefRecordKind::Free { next_free } => {
                                            ("abs".to_string(), next_free as u64, "free")
                                        }
                                    };
                                    println!(
                                        "-            [      ] xref      {},{} {} {:010} {}",
                                        record.num, record.gen, addr_mode, addr, cl
                                    );
                                }
                            }
                        }
                        // Expand object streams into one row per child
                        Some("/ObjStm") => {
                            if let Ok(children) = parse_objstm(s) {
                                for (seq, (child_num, child)) in children.iter().enumerate() {
                                    let cl = match child {
                                        PDFObject::Dictionary(d) => {
                                            format!("dict {}", keys_in_line(d))
                                        }
                                        other => format!("{:?}", other),
                                    };
                                    println!(
                                        "-            [      ] emb_obj   {},0 {},{} {}",
                                        child_num, num, seq, cl
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Region::XrefTable {
                subsections,
                trailer,
                ..
            } => {
                println!(
                    "- {:010} [{:6}] xreftable {}",
                    pos,
                    size,
                    keys_in_line(trailer)
                );
                for sub in subsections {
                    for (i, row) in sub.rows.iter().enumerate() {
                        let num = sub.first + i as u32;
                        let cl = if row.in_use { "inuse" } else { "free" };
                        println!(
                            "-            [      ] xref      {},{} abs {:010} {}",
                            num, row.gen, row.offset, cl
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn dump(path: &str) -> Result<(), PDFError> {
    let provider = share(FileProvider::open(path)?);
    print!("{}", hexdump(&provider, None, None)?);
    Ok(())
}

fn compress(path: &str, output: Option<String>) -> Result<(), PDFError> {
    let Some(output) = output else {
        eprintln!("Error: compress needs -o OUT");
        process::exit(1);
    };
    let before = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut doc = PDFDocument::load_file(path)?;
    let mut compressed = doc.compress()?;
    compressed.save_file(&output)?;
    let after = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
    println!("{} bytes -> {} bytes ({})", before, after, output);
    Ok(())
}

fn rotate(path: &str, args: &[String]) -> Result<(), PDFError> {
    let degrees: i64 = args
        .get(3)
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| {
            eprintln!("Error: rotate needs DEGREES");
            process::exit(1);
        });
    let Some(output) = output_arg(args) else {
        eprintln!("Error: rotate needs -o OUT");
        process::exit(1);
    };
    let mut doc = PDFDocument::load_file(path)?;
    let mut rotated = doc.rotate(degrees, None)?;
    rotated.save_file(&output)?;
    println!("rotated all pages by {} degrees -> {}", degrees, output);
    Ok(())
}
