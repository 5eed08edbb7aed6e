//! Build command implementation

use std::{
    fs::File,
    io::{BufRead, BufReader},
};

use anyhow::{Context, Result, bail};
use ghostdex_index::{IndexConfig, Posting, TermIndex};
use ghostdex_serial::Value;

use crate::{StoreArgs, commands::Store};

/// One input line: `term<TAB>doc[<TAB>pos,...[<TAB>title]]`.
#[derive(Debug, PartialEq)]
pub struct InputLine {
    pub term: String,
    pub posting: Posting,
}

pub fn parse_line(line: &str) -> Result<InputLine> {
    let mut fields = line.split('\t');
    let term = match fields.next() {
        Some(term) if !term.is_empty() => term.to_string(),
        _ => bail!("missing term"),
    };
    let doc = fields
        .next()
        .context("missing document")?
        .trim()
        .parse::<u64>()
        .context("bad document number")?;
    let positions = match fields.next().map(str::trim) {
        None | Some("") => Vec::new(),
        Some(list) => list
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .context("bad position list")?,
    };
    let title = fields.next().unwrap_or_default();
    if fields.next().is_some() {
        bail!("too many fields");
    }
    Ok(InputLine {
        term,
        posting: Posting::new(doc, title, positions),
    })
}

/// Loads every line of `input` into a new index and commits it.
pub fn build_index(
    store: &Store,
    input: &str,
    name: String,
    config: IndexConfig,
) -> Result<(Value, usize)> {
    let index = TermIndex::new(name, config, store.archiver())?;
    let file = File::open(input).with_context(|| format!("Failed to open {input}"))?;
    let mut count = 0;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {input}"))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let InputLine { term, posting } =
            parse_line(&line).with_context(|| format!("{input}:{}", number + 1))?;
        index.insert(&term, posting)?;
        count += 1;
    }
    let reference = index.commit()?;
    Ok((reference, count))
}

/// Run the build command
pub fn run(
    args: &StoreArgs,
    input: String,
    name: String,
    node_min: Option<usize>,
    capacity: Option<usize>,
) -> Result<()> {
    let defaults = IndexConfig::default();
    let config = IndexConfig {
        node_min: node_min.unwrap_or(defaults.node_min),
        packer_capacity: capacity.unwrap_or(defaults.packer_capacity),
        ..defaults
    };
    config.validate()?;

    let store = Store::open(args)?;
    let (reference, count) = build_index(&store, &input, name, config)?;
    eprintln!("Indexed {count} postings from {input}");
    println!("{}", reference.as_str("reference")?);
    store.report();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_line() {
        let line = parse_line("ghost\t12\t3, 9\tA Ghost Story").unwrap();
        assert_eq!(line.term, "ghost");
        assert_eq!(line.posting.doc, 12);
        assert_eq!(line.posting.positions, vec![3, 9]);
        assert_eq!(line.posting.title, "A Ghost Story");

        let line = parse_line("node\t7").unwrap();
        assert!(line.posting.positions.is_empty());
        assert!(line.posting.title.is_empty());

        assert!(parse_line("\t7").is_err());
        assert!(parse_line("node").is_err());
        assert!(parse_line("node\tseven").is_err());
        assert!(parse_line("node\t7\t1,x").is_err());
        assert!(parse_line("node\t7\t1\tt\textra").is_err());
    }

    #[test]
    fn test_build_and_reopen() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.tsv");
        let mut file = File::create(&input).unwrap();
        writeln!(file, "# term, doc, positions").unwrap();
        for doc in 0..50 {
            writeln!(file, "all\t{doc}\t0").unwrap();
            writeln!(file, "mod{}\t{doc}\t1,2", doc % 5).unwrap();
        }
        drop(file);

        let args = StoreArgs {
            store: dir.path().join("store").display().to_string(),
            threads: Some(2),
            verbose: false,
        };
        let store = Store::open(&args).unwrap();
        let config = IndexConfig {
            node_min: 2,
            postings_node_min: 2,
            packer_capacity: 16,
        };
        let (reference, count) =
            build_index(&store, input.to_str().unwrap(), "test".to_string(), config).unwrap();
        assert_eq!(count, 100);

        let index = store.open_index(reference.as_str("reference").unwrap()).unwrap();
        assert_eq!(index.term_count(), 6);
        assert_eq!(index.postings("all").unwrap().len(), 50);
        let docs: Vec<u64> = index.postings("mod3").unwrap().iter().map(|p| p.doc).collect();
        assert_eq!(docs, (0..10).map(|i| 3 + 5 * i).collect::<Vec<u64>>());
    }
}
