//! Output formatting for search results

use crate::query::engine::SearchHit;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print hits with the path as a heading and highlighted snippets below it
pub fn print_hits(hits: &[SearchHit], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    write_hits(&mut stdout, hits)
}

/// Write hits to any color-capable writer
pub fn write_hits<W: WriteColor>(out: &mut W, hits: &[SearchHit]) -> io::Result<()> {
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            // Blank line between files
            writeln!(out)?;
        }

        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
        write!(out, "{}", hit.path.display())?;
        out.reset()?;
        write!(out, " ")?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        writeln!(out, "({})", hit.score)?;
        out.reset()?;

        for snippet in &hit.snippets {
            write!(out, "  ")?;
            for (fragment, highlighted) in snippet.fragments() {
                if highlighted {
                    out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
                    write!(out, "{}", fragment)?;
                    out.reset()?;
                } else {
                    write!(out, "{}", fragment)?;
                }
            }
            writeln!(out)?;
        }
    }

    Ok(())
}

/// Print hits as a JSON array
pub fn print_json(hits: &[SearchHit]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    serde_json::to_writer_pretty(&mut lock, hits)?;
    writeln!(lock)
}

/// Print only paths, one per line
pub fn print_files_only(hits: &[SearchHit], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);

    for hit in hits {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        writeln!(stdout, "{}", hit.path.display())?;
        stdout.reset()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::snippet::Snippet;
    use std::path::PathBuf;
    use termcolor::NoColor;

    #[test]
    fn test_write_hits_plain() {
        let hits = vec![
            SearchHit {
                path: PathBuf::from("cases/login.md"),
                score: 2,
                mtime: 0,
                snippets: vec![Snippet {
                    text: "open the login page".to_string(),
                    start: 10,
                    highlights: vec![9..14],
                }],
            },
            SearchHit {
                path: PathBuf::from("b.md"),
                score: 1,
                mtime: 0,
                snippets: Vec::new(),
            },
        ];

        let mut out = NoColor::new(Vec::new());
        write_hits(&mut out, &hits).unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(text, "cases/login.md (2)\n  open the login page\n\nb.md (1)\n");
    }
}
