//! The interactive loop: every command issues store or selection
//! operations and prints the result. Nothing here touches disk except
//! an explicit `save`.

use std::io::{self, BufRead, Write};

use tabula_core::{Catalog, Selection};
use tabula_storage::{Store, TrnId};

pub fn run(mut store: Store, catalog: Catalog) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut stdout = io::stdout();

    println!(
        "{} transactions from {} file(s); 'help' lists commands.",
        store.entry_count(),
        store.sets().count()
    );

    let mut current: Vec<TrnId> = store.all().map(|(id, _)| id).collect();
    let mut input = String::new();

    loop {
        stdout.write_all(b"> ")?;
        stdout.flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF behaves like quit
        }
        let line = input.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "help" | "?" => print_help(),
            "show" | "s" => {
                if rest.is_empty() {
                    current = store.all().map(|(id, _)| id).collect();
                } else {
                    match Selection::compile(rest) {
                        Ok(sel) => current = store.select(&sel, &catalog),
                        Err(e) => {
                            println!("filter error: {e}");
                            continue;
                        }
                    }
                }
                print_table(&store, &current);
            }
            "set" => {
                let Some((num, cat)) = rest.split_once(char::is_whitespace) else {
                    println!("usage: set <number> <category>");
                    continue;
                };
                let Some(id) = resolve(&current, num) else {
                    println!("no transaction #{num} in the current listing");
                    continue;
                };
                match store.set_category(id, Some(cat.trim()), &catalog) {
                    Ok(()) => {}
                    Err(e) => println!("{e}"),
                }
            }
            "clear" => {
                let Some(id) = resolve(&current, rest) else {
                    println!("usage: clear <number>");
                    continue;
                };
                if let Err(e) = store.set_category(id, None, &catalog) {
                    println!("{e}");
                }
            }
            "auto" => {
                if catalog.is_empty() {
                    println!("no category catalog loaded (--categories)");
                    continue;
                }
                let s = store.auto_assign(&catalog);
                println!(
                    "assigned {}, ambiguous {}, already categorized {}, no match {}",
                    s.assigned, s.ambiguous, s.already_categorized, s.unmatched
                );
            }
            "fields" => println!("{}", store.field_names().join(", ")),
            "cats" => {
                if catalog.is_empty() {
                    println!("no category catalog loaded (--categories)");
                    continue;
                }
                let hits = catalog.search(rest);
                if hits.is_empty() {
                    println!("no matching categories");
                }
                for path in hits {
                    println!("  {path}");
                }
            }
            "save" => match store.save_all() {
                Ok(n) => println!("{n} file(s) written"),
                Err(e) => println!("save failed: {e}"),
            },
            "quit" | "q" => {
                if store.is_modified() {
                    println!("unsaved changes: 'save' first, or 'quit!' to discard");
                } else {
                    break;
                }
            }
            "quit!" => break,
            other => println!("unknown command '{other}'; 'help' lists commands"),
        }
    }

    Ok(())
}

/// 1-based index into the current listing, as printed in its first column.
fn resolve(current: &[TrnId], s: &str) -> Option<TrnId> {
    let idx: usize = s.trim().parse().ok()?;
    current.get(idx.checked_sub(1)?).copied()
}

fn print_table(store: &Store, ids: &[TrnId]) {
    let field_names = store.field_names();
    let mut headings: Vec<String> = vec!["#".into(), "date".into(), "value".into(), "cat".into()];
    headings.extend(field_names.iter().cloned());

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(ids.len());
    for (idx, id) in ids.iter().enumerate() {
        let Some(trn) = store.get(*id) else { continue };
        let mut row = vec![
            (idx + 1).to_string(),
            trn.date.to_string(),
            trn.value.to_string(),
            trn.category().unwrap_or("").to_string(),
        ];
        row.extend(field_names.iter().map(|n| trn.field(n).unwrap_or("").to_string()));
        rows.push(row);
    }

    let mut widths: Vec<usize> = headings.iter().map(String::len).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    // '#' and 'value' right-aligned, everything else left.
    let fmt_row = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, &w))| {
                if i == 0 || i == 2 {
                    format!("{cell:>w$}")
                } else {
                    format!("{cell:<w$}")
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", fmt_row(&headings));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &rows {
        println!("{}", fmt_row(row));
    }
    println!("({} transactions)", rows.len());
}

fn print_help() {
    println!(
        "\
commands:
  show [FILTER]      list transactions, optionally filtered
                     e.g.  show value<0 and date>=2020-06
                           show category=Food or text~pizza
  set N CATEGORY     categorize entry N of the current listing
  clear N            remove entry N's category
  auto               auto-categorize from catalog rules
  fields             list the known open field names
  cats [HINT]        list catalog categories (substring match)
  save               write modified files back to disk
  quit               exit (quit! discards unsaved changes)"
    );
}
