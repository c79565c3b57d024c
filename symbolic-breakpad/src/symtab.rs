//! Address-ordered symbol tables built from Breakpad symbol files.

use std::collections::BTreeMap;
use std::str;

use debugid::DebugId;

use crate::error::{ParseError, ParseErrorKind};
use crate::lines::Lines;
use crate::records::{
    CodeIdRecord, FileRecord, FuncRecord, LineRecord, ModuleRecord, PublicRecord, RecordError,
};

/// Distance past the end of a module's last known symbol that lookups still accept.
///
/// Symbol files frequently under-report the extent of the last function, and `PUBLIC` records do
/// not carry a size at all. Clients have long relied on offsets slightly past that extent still
/// resolving to the last symbol.
pub const DEFAULT_END_SLACK: u64 = 0x10000;

/// Options controlling which records [`SymbolTable::parse_with_options`] retains.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ParseOptions {
    /// Retain `FILE` and line records to annotate lookups with source locations.
    pub with_lines: bool,
}

/// The record a [`Symbol`] was created from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SymbolKind {
    /// A `FUNC` record with a declared size.
    Func,
    /// A `PUBLIC` record without size information.
    Public,
}

/// A named address within a module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Symbol {
    /// The start address relative to the image base.
    pub address: u64,
    /// The declared size of the function, if known.
    pub size: Option<u64>,
    /// The record type this symbol originates from.
    pub kind: SymbolKind,
    /// The demangled symbol name.
    pub name: String,
}

impl Symbol {
    /// Creates a new `FUNC` symbol.
    pub fn func<S: Into<String>>(address: u64, size: u64, name: S) -> Self {
        Symbol {
            address,
            size: Some(size),
            kind: SymbolKind::Func,
            name: name.into(),
        }
    }

    /// Creates a new `PUBLIC` symbol.
    pub fn public<S: Into<String>>(address: u64, name: S) -> Self {
        Symbol {
            address,
            size: None,
            kind: SymbolKind::Public,
            name: name.into(),
        }
    }

    fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size.unwrap_or(0))
    }
}

/// Metadata of the module described by a symbol file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleInfo {
    /// Name of the operating system.
    pub os: String,
    /// Name of the CPU architecture.
    pub arch: String,
    /// The raw Breakpad identifier from the header.
    pub id: String,
    /// The identifier parsed as debug id, if it is well-formed.
    pub debug_id: Option<DebugId>,
    /// Name of the original debug file.
    pub name: String,
    /// Platform-dependent identifier of the code file, from `INFO CODE_ID`.
    pub code_id: Option<String>,
    /// Name of the code file, from `INFO CODE_ID`.
    pub code_file: Option<String>,
}

impl ModuleInfo {
    fn from_record(record: &ModuleRecord<'_>) -> Self {
        ModuleInfo {
            os: record.os.to_owned(),
            arch: record.arch.to_owned(),
            id: record.id.to_owned(),
            debug_id: DebugId::from_breakpad(record.id).ok(),
            name: record.name.to_owned(),
            code_id: None,
            code_file: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct LineEntry {
    address: u64,
    size: u64,
    line: u64,
    file_id: u64,
}

/// The result of [`SymbolTable::lookup`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolLookup<'a> {
    /// The symbol covering the looked up address.
    pub symbol: &'a Symbol,
    /// Distance of the looked up address from the start of the symbol.
    pub offset: u64,
    /// The source file, if line records were retained and cover the address.
    pub file: Option<&'a str>,
    /// The source line, if line records were retained and cover the address.
    pub line: Option<u64>,
}

/// An immutable, address-ordered lookup table of symbols for one module.
///
/// Symbol addresses are strictly increasing. When a symbol file declares several symbols at the
/// same address, the last one in file order is kept.
///
/// # Example
///
/// ```
/// use symbolic_breakpad::{Symbol, SymbolTable};
///
/// let table = SymbolTable::from_symbols(
///     Default::default(),
///     vec![Symbol::public(0x1000, "foo"), Symbol::public(0x2000, "bar")],
/// );
///
/// let lookup = table.lookup(0x1500).unwrap();
/// assert_eq!(lookup.symbol.name, "foo");
/// assert_eq!(lookup.offset, 0x500);
/// assert!(table.lookup(0x500).is_none());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolTable {
    module: ModuleInfo,
    symbols: Vec<Symbol>,
    lines: Vec<LineEntry>,
    files: BTreeMap<u64, String>,
    end_address: Option<u64>,
    skipped_lines: usize,
}

impl SymbolTable {
    /// Parses a Breakpad symbol file with default options.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with_options(data, ParseOptions::default())
    }

    /// Parses a Breakpad symbol file.
    ///
    /// The first non-empty line must be a valid `MODULE` record. All other lines are processed in
    /// a single pass; malformed or unknown records are skipped without invalidating the rest of
    /// the file.
    #[tracing::instrument(level = "debug", skip_all, fields(len = data.len()))]
    pub fn parse_with_options(data: &[u8], options: ParseOptions) -> Result<Self, ParseError> {
        let mut lines = Lines::new(data);

        let header = loop {
            match lines.next() {
                None => return Err(ParseErrorKind::Empty.into()),
                Some(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                Some(line) => break line,
            }
        };

        let header =
            str::from_utf8(header).map_err(|e| ParseError::new(ParseErrorKind::BadEncoding, e))?;
        let module = ModuleRecord::parse(header.trim())
            .map_err(|e| ParseError::new(ParseErrorKind::InvalidMagic, e))?;

        let mut builder = TableBuilder::new(ModuleInfo::from_record(&module), options);
        for line in lines {
            builder.process_line(line);
        }

        Ok(builder.finish())
    }

    /// Creates a table from a list of symbols in declaration order.
    ///
    /// The symbols are sorted and de-duplicated like the records of a parsed file.
    pub fn from_symbols(module: ModuleInfo, symbols: Vec<Symbol>) -> Self {
        let end_address = symbols.iter().map(Symbol::end_address).max();
        let mut table = SymbolTable {
            module,
            symbols,
            lines: Vec::new(),
            files: BTreeMap::new(),
            end_address,
            skipped_lines: 0,
        };
        table.sort();
        table
    }

    /// Metadata from the module header.
    pub fn module(&self) -> &ModuleInfo {
        &self.module
    }

    /// All symbols ordered by address.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// The number of symbols in this table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if this table contains no symbols.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// The end of the highest known symbol extent, if there are any symbols.
    pub fn end_address(&self) -> Option<u64> {
        self.end_address
    }

    /// Returns `true` if source locations were retained.
    pub fn has_line_info(&self) -> bool {
        !self.lines.is_empty()
    }

    /// The number of malformed records that were skipped while parsing.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Looks up the symbol covering `offset`, tolerating [`DEFAULT_END_SLACK`].
    pub fn lookup(&self, offset: u64) -> Option<SymbolLookup<'_>> {
        self.lookup_with_slack(offset, DEFAULT_END_SLACK)
    }

    /// Looks up the symbol covering `offset`.
    ///
    /// This returns the symbol with the greatest address less than or equal to `offset`. Offsets
    /// at or beyond the module's end address plus `slack` do not resolve. Returns `None` if the
    /// offset lies before the first symbol or the table is empty.
    pub fn lookup_with_slack(&self, offset: u64, slack: u64) -> Option<SymbolLookup<'_>> {
        // Addresses are unique, so the partition point is the index after the last candidate.
        let index = self.symbols.partition_point(|s| s.address <= offset);
        let symbol = self.symbols.get(index.checked_sub(1)?)?;

        if let Some(end) = self.end_address {
            if offset >= end.saturating_add(slack) {
                return None;
            }
        }

        let line = self.lookup_line(symbol, offset);

        Some(SymbolLookup {
            symbol,
            offset: offset - symbol.address,
            file: line.and_then(|l| self.files.get(&l.file_id).map(String::as_str)),
            line: line.map(|l| l.line).filter(|l| *l > 0),
        })
    }

    fn lookup_line(&self, symbol: &Symbol, offset: u64) -> Option<&LineEntry> {
        if symbol.kind != SymbolKind::Func {
            return None;
        }

        let index = self.lines.partition_point(|l| l.address <= offset);
        let line = self.lines.get(index.checked_sub(1)?)?;

        let covers = line.address >= symbol.address
            && offset < line.address.saturating_add(line.size);
        covers.then_some(line)
    }

    /// Sorts symbols and lines, keeping the last entry for every address.
    fn sort(&mut self) {
        self.symbols.sort_by_key(|s| s.address);
        self.symbols = keep_last_by_address(std::mem::take(&mut self.symbols), |s| s.address);

        self.lines.sort_by_key(|l| l.address);
        self.lines = keep_last_by_address(std::mem::take(&mut self.lines), |l| l.address);
    }
}

/// De-duplicates a stably sorted list, retaining the last item of every run of equal keys.
fn keep_last_by_address<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> u64,
{
    let mut deduped: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match deduped.last_mut() {
            Some(last) if key(last) == key(&item) => *last = item,
            _ => deduped.push(item),
        }
    }
    deduped
}

struct TableBuilder {
    options: ParseOptions,
    table: SymbolTable,
    in_func: bool,
}

impl TableBuilder {
    fn new(module: ModuleInfo, options: ParseOptions) -> Self {
        TableBuilder {
            options,
            table: SymbolTable {
                module,
                symbols: Vec::new(),
                lines: Vec::new(),
                files: BTreeMap::new(),
                end_address: None,
                skipped_lines: 0,
            },
            in_func: false,
        }
    }

    fn skip(&mut self, error: Option<RecordError>) {
        self.table.skipped_lines += 1;
        if let Some(error) = error {
            tracing::trace!(%error, "skipping malformed record");
        }
    }

    fn add_symbol(&mut self, symbol: Symbol) {
        let end = symbol.end_address();
        self.table.end_address = Some(self.table.end_address.map_or(end, |e| e.max(end)));
        self.table.symbols.push(symbol);
    }

    fn process_line(&mut self, line: &[u8]) {
        if line.is_empty() {
            return;
        }

        let line = match str::from_utf8(line) {
            Ok(line) => line.trim_end(),
            Err(_) => return self.skip(None),
        };

        let keyword = line.split(char::is_whitespace).next().unwrap_or_default();
        match keyword {
            "FUNC" => match FuncRecord::parse(line) {
                Ok(record) => {
                    self.add_symbol(Symbol::func(record.address, record.size, record.name));
                    self.in_func = true;
                }
                Err(error) => {
                    self.in_func = false;
                    self.skip(Some(error));
                }
            },
            "PUBLIC" => {
                self.in_func = false;
                match PublicRecord::parse(line) {
                    Ok(record) => self.add_symbol(Symbol::public(record.address, record.name)),
                    Err(error) => self.skip(Some(error)),
                }
            }
            "FILE" => {
                self.in_func = false;
                if self.options.with_lines {
                    match FileRecord::parse(line) {
                        Ok(record) => {
                            self.table.files.insert(record.id, record.name.to_owned());
                        }
                        Err(error) => self.skip(Some(error)),
                    }
                }
            }
            "INFO" => {
                self.in_func = false;
                if let Ok(record) = CodeIdRecord::parse(line) {
                    let module = &mut self.table.module;
                    if module.code_id.is_none() {
                        module.code_id = Some(record.code_id.to_owned());
                        module.code_file =
                            Some(record.code_file.to_owned()).filter(|f| !f.is_empty());
                    }
                }
            }
            // Inline records sit between a function and its line records.
            "INLINE" | "INLINE_ORIGIN" => {}
            "MODULE" | "STACK" => self.in_func = false,
            _ if self.in_func => {
                if self.options.with_lines {
                    match LineRecord::parse(line) {
                        Ok(record) => self.table.lines.push(LineEntry {
                            address: record.address,
                            size: record.size,
                            line: record.line,
                            file_id: record.file_id,
                        }),
                        Err(error) => self.skip(Some(error)),
                    }
                }
            }
            _ => self.skip(None),
        }
    }

    fn finish(mut self) -> SymbolTable {
        self.table.sort();

        if self.table.skipped_lines > 0 {
            tracing::debug!(
                skipped = self.table.skipped_lines,
                "skipped malformed lines in symbol file"
            );
        }

        self.table
    }
}
