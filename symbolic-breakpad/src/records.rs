//! Parsers for the individual records of a Breakpad symbol file.
//!
//! Each record occupies a single line. All parsers operate on a line that has already been
//! stripped of its line terminator and decoded as UTF-8. See the [symbol file documentation] for
//! a description of the format.
//!
//! [symbol file documentation]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md

use std::fmt;

use thiserror::Error;

/// Placeholder used for missing function or symbol names.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// The kinds of records in a Breakpad symbol file.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    /// `FILE` records.
    File,
    /// `FUNC` records.
    Func,
    /// `INFO` records.
    Info,
    /// Line records following a `FUNC` record.
    Line,
    /// The `MODULE` header.
    Module,
    /// `PUBLIC` records.
    Public,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::File => write!(f, "FILE"),
            RecordType::Func => write!(f, "FUNC"),
            RecordType::Info => write!(f, "INFO"),
            RecordType::Line => write!(f, "LINE"),
            RecordType::Module => write!(f, "MODULE"),
            RecordType::Public => write!(f, "PUBLIC"),
        }
    }
}

/// An error raised for a single record line that cannot be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to parse {record} record: {message}")]
pub struct RecordError {
    record: RecordType,
    message: &'static str,
}

impl RecordError {
    /// The type of record that failed to parse.
    pub fn record_type(&self) -> RecordType {
        self.record
    }
}

trait ParseRecord<'d>: Sized {
    const RECORD_TYPE: RecordType;

    fn parse_str(input: &'d str) -> Result<Self, &'static str>;

    fn parse(input: &'d str) -> Result<Self, RecordError> {
        debug_assert!(!input.contains('\n'), "Illegal input: {}", input);

        Self::parse_str(input).map_err(|message| RecordError {
            record: Self::RECORD_TYPE,
            message,
        })
    }
}

fn next(input: &str) -> Result<(&str, &str), &'static str> {
    if input.is_empty() {
        return Err("unexpected end of input");
    }

    Ok(match input.find(char::is_whitespace) {
        Some(split) => (&input[..split], input[split..].trim_start()),
        None => (input, ""),
    })
}

fn expect<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let (a, rest) = next(input).ok()?;
    (a == prefix).then_some(rest)
}

fn next_and<'a, T, F>(input: &'a str, mut parser: F) -> Result<(T, &'a str), &'static str>
where
    F: FnMut(&'a str) -> Result<T, &'static str>,
{
    next(input).and_then(|(part, rest)| Ok((parser(part)?, rest)))
}

fn parse_hex64(input: &str) -> Result<u64, &'static str> {
    u64::from_str_radix(input, 16).or(Err("expected hex number"))
}

fn parse_u64(input: &str) -> Result<u64, &'static str> {
    input.parse().or(Err("expected number"))
}

fn parse_line_number(input: &str) -> Result<u64, &'static str> {
    // Some dump_syms versions emit negative line numbers for compiler-generated code.
    let line = input.parse::<i64>().or(Err("expected number"))?;
    Ok(line.max(0) as u64)
}

fn hex_str(input: &str) -> Result<&str, &'static str> {
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(input)
    } else {
        Err("expected hex identifier")
    }
}

fn done(input: &str) -> Result<(), &'static str> {
    match input {
        "" => Ok(()),
        _ => Err("unexpected trailing data"),
    }
}

fn name_or_unknown(input: &str) -> &str {
    match input.trim_end() {
        "" => UNKNOWN_NAME,
        name => name,
    }
}

/// Strips the optional `m` marker of `FUNC` and `PUBLIC` records.
fn multiple(input: &str) -> (bool, &str) {
    match expect(input, "m") {
        Some(rest) => (true, rest),
        None => (false, input),
    }
}

/// A [module record], constituting the header of a Breakpad file.
///
/// Example: `MODULE Linux x86 D3096ED481217FD4C16B29CD9BC208BA0 firefox-bin`
///
/// [module record]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md#module-records
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleRecord<'d> {
    /// Name of the operating system.
    pub os: &'d str,
    /// Name of the CPU architecture.
    pub arch: &'d str,
    /// Breakpad identifier.
    pub id: &'d str,
    /// Name of the original file.
    pub name: &'d str,
}

impl<'d> ModuleRecord<'d> {
    /// Parses a module record from a single line.
    pub fn parse(input: &'d str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl<'d> ParseRecord<'d> for ModuleRecord<'d> {
    const RECORD_TYPE: RecordType = RecordType::Module;

    fn parse_str(input: &'d str) -> Result<Self, &'static str> {
        let rest = expect(input, "MODULE").ok_or("missing MODULE prefix")?;
        let (os, rest) = next(rest)?;
        let (arch, rest) = next(rest)?;
        let (id, rest) = next_and(rest, hex_str)?;

        Ok(ModuleRecord {
            os,
            arch,
            id,
            name: name_or_unknown(rest),
        })
    }
}

/// An `INFO CODE_ID` record carrying the platform-dependent identifier of the code file.
///
/// Example: `INFO CODE_ID 5AB380779000 xul.dll`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CodeIdRecord<'d> {
    /// Identifier of the code file.
    pub code_id: &'d str,
    /// File name of the code file, if present.
    pub code_file: &'d str,
}

impl<'d> CodeIdRecord<'d> {
    /// Parses a code id record from a single line.
    ///
    /// Returns an error for `INFO` records of any other scope.
    pub fn parse(input: &'d str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl<'d> ParseRecord<'d> for CodeIdRecord<'d> {
    const RECORD_TYPE: RecordType = RecordType::Info;

    fn parse_str(input: &'d str) -> Result<Self, &'static str> {
        let rest = expect(input, "INFO").ok_or("missing INFO prefix")?;
        let rest = expect(rest, "CODE_ID").ok_or("not a CODE_ID record")?;
        let (code_id, rest) = next_and(rest, hex_str)?;

        Ok(CodeIdRecord {
            code_id,
            code_file: rest.trim_end(),
        })
    }
}

/// A [file record], specifying the path to a source code file.
///
/// Example: `FILE 2 /home/jimb/mc/in/browser/app/nsBrowserApp.cpp`
///
/// [file record]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md#file-records
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileRecord<'d> {
    /// Breakpad-internal identifier of the file.
    pub id: u64,
    /// The path to the source file, usually relative to the compilation directory.
    pub name: &'d str,
}

impl<'d> FileRecord<'d> {
    /// Parses a file record from a single line.
    pub fn parse(input: &'d str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl<'d> ParseRecord<'d> for FileRecord<'d> {
    const RECORD_TYPE: RecordType = RecordType::File;

    fn parse_str(input: &'d str) -> Result<Self, &'static str> {
        let rest = expect(input, "FILE").ok_or("missing FILE prefix")?;
        let (id, rest) = next_and(rest, parse_u64)?;

        Ok(FileRecord {
            id,
            name: name_or_unknown(rest),
        })
    }
}

/// A [function record].
///
/// Example: `FUNC m c184 30 0 nsQueryInterfaceWithError::operator()(nsID const&, void**) const`
///
/// [function record]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md#func-records
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FuncRecord<'d> {
    /// Whether this function was referenced multiple times.
    pub multiple: bool,
    /// The start address of this function relative to the image base (load address).
    pub address: u64,
    /// The size of the code covered by this function's line records.
    pub size: u64,
    /// The size of the parameters on the runtime stack.
    pub parameter_size: u64,
    /// The demangled function name.
    pub name: &'d str,
}

impl<'d> FuncRecord<'d> {
    /// Parses a function record from a single line.
    pub fn parse(input: &'d str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl<'d> ParseRecord<'d> for FuncRecord<'d> {
    const RECORD_TYPE: RecordType = RecordType::Func;

    fn parse_str(input: &'d str) -> Result<Self, &'static str> {
        let rest = expect(input, "FUNC").ok_or("missing FUNC prefix")?;
        let (multiple, rest) = multiple(rest);
        let (address, rest) = next_and(rest, parse_hex64)?;
        let (size, rest) = next_and(rest, parse_hex64)?;
        let (parameter_size, rest) = next_and(rest, parse_hex64)?;

        Ok(FuncRecord {
            multiple,
            address,
            size,
            parameter_size,
            name: name_or_unknown(rest),
        })
    }
}

/// A [public function symbol record].
///
/// Example: `PUBLIC m 2160 0 Public2_1`
///
/// [public function symbol record]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md#public-records
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublicRecord<'d> {
    /// Whether this symbol was referenced multiple times.
    pub multiple: bool,
    /// The address of this symbol relative to the image base (load address).
    pub address: u64,
    /// The size of the parameters on the runtime stack.
    pub parameter_size: u64,
    /// The demangled function name of the symbol.
    pub name: &'d str,
}

impl<'d> PublicRecord<'d> {
    /// Parses a public record from a single line.
    pub fn parse(input: &'d str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl<'d> ParseRecord<'d> for PublicRecord<'d> {
    const RECORD_TYPE: RecordType = RecordType::Public;

    fn parse_str(input: &'d str) -> Result<Self, &'static str> {
        let rest = expect(input, "PUBLIC").ok_or("missing PUBLIC prefix")?;
        let (multiple, rest) = multiple(rest);
        let (address, rest) = next_and(rest, parse_hex64)?;
        let (parameter_size, rest) = next_and(rest, parse_hex64)?;

        Ok(PublicRecord {
            multiple,
            address,
            parameter_size,
            name: name_or_unknown(rest),
        })
    }
}

/// A [line record] belonging to the preceding [`FuncRecord`].
///
/// Line records are so frequent in a Breakpad symbol file that they do not have a record
/// identifier. They immediately follow the function record that they belong to.
///
/// Example: `c184 7 59 4`
///
/// [line record]: https://github.com/google/breakpad/blob/master/docs/symbol_files.md#line-records
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineRecord {
    /// The start address for this line relative to the image base (load address).
    pub address: u64,
    /// The size of the code covered by this line record.
    pub size: u64,
    /// The line number (zero means no line number).
    pub line: u64,
    /// Identifier of the [`FileRecord`] specifying the file name.
    pub file_id: u64,
}

impl LineRecord {
    /// Parses a line record from a single line.
    pub fn parse(input: &str) -> Result<Self, RecordError> {
        ParseRecord::parse(input)
    }
}

impl ParseRecord<'_> for LineRecord {
    const RECORD_TYPE: RecordType = RecordType::Line;

    fn parse_str(input: &str) -> Result<Self, &'static str> {
        let (address, rest) = next_and(input, parse_hex64)?;
        let (size, rest) = next_and(rest, parse_hex64)?;
        let (line, rest) = next_and(rest, parse_line_number)?;
        let (file_id, rest) = next_and(rest, parse_u64)?;
        done(rest)?;

        Ok(LineRecord {
            address,
            size,
            line,
            file_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_parse_module_record() {
        let record =
            ModuleRecord::parse("MODULE Linux x86_64 492E2DD23CC306CA9C494EEF1533A3810 crash")
                .unwrap();

        assert_eq!(
            record,
            ModuleRecord {
                os: "Linux",
                arch: "x86_64",
                id: "492E2DD23CC306CA9C494EEF1533A3810",
                name: "crash",
            }
        );
    }

    #[test]
    fn test_parse_module_record_short_id() {
        let record = ModuleRecord::parse("MODULE Linux x86_64 6216C672A8D33EC9CF4A1BAB8B29D00E0")
            .unwrap();
        assert_eq!(record.name, UNKNOWN_NAME);
    }

    #[test]
    fn test_parse_module_record_invalid_id() {
        let error = ModuleRecord::parse("MODULE Linux x86_64 not-hex crash").unwrap_err();
        assert_eq!(error.record_type(), RecordType::Module);
        assert_eq!(
            error.to_string(),
            "failed to parse MODULE record: expected hex identifier"
        );
    }

    #[test]
    fn test_parse_code_id_record() {
        let record = CodeIdRecord::parse("INFO CODE_ID 5AB380779000 xul.dll").unwrap();
        assert_eq!(
            record,
            CodeIdRecord {
                code_id: "5AB380779000",
                code_file: "xul.dll",
            }
        );

        assert!(CodeIdRecord::parse("INFO GENERATOR mozilla/dump_syms 2.0").is_err());
    }

    #[test]
    fn test_parse_file_record() {
        let record = FileRecord::parse("FILE 37 /usr/include/libkern/i386/_OSByteOrder.h").unwrap();
        assert_eq!(
            record,
            FileRecord {
                id: 37,
                name: "/usr/include/libkern/i386/_OSByteOrder.h",
            }
        );
    }

    #[test]
    fn test_parse_file_record_space() {
        let record = FileRecord::parse("FILE 38 /usr/local/src/filename with spaces.c").unwrap();
        assert_eq!(record.name, "/usr/local/src/filename with spaces.c");
    }

    #[test]
    fn test_parse_func_record() {
        let record = FuncRecord::parse("FUNC 1730 1a 0 <name omitted>").unwrap();
        assert_eq!(
            record,
            FuncRecord {
                multiple: false,
                address: 0x1730,
                size: 0x1a,
                parameter_size: 0,
                name: "<name omitted>",
            }
        );
    }

    #[test]
    fn test_parse_func_record_multiple() {
        let record = FuncRecord::parse("FUNC m 1730 1a 0 <name omitted>").unwrap();
        assert!(record.multiple);
        assert_eq!(record.address, 0x1730);
    }

    #[test]
    fn test_parse_func_record_no_name() {
        let record = FuncRecord::parse("FUNC 0 f 0").unwrap();
        assert_eq!(record.name, UNKNOWN_NAME);
        assert_eq!(record.size, 0xf);
    }

    #[test]
    fn test_parse_func_record_truncated() {
        let error = FuncRecord::parse("FUNC 1730").unwrap_err();
        assert_eq!(error.record_type(), RecordType::Func);
    }

    #[test]
    fn test_parse_public_record() {
        let record = PublicRecord::parse("PUBLIC 5180 0 __clang_call_terminate").unwrap();
        assert_eq!(
            record,
            PublicRecord {
                multiple: false,
                address: 0x5180,
                parameter_size: 0,
                name: "__clang_call_terminate",
            }
        );
    }

    #[test]
    fn test_parse_public_record_multiple() {
        let record = PublicRecord::parse("PUBLIC m 5180 0 __clang_call_terminate").unwrap();
        assert!(record.multiple);
    }

    #[test]
    fn test_parse_public_record_bad_address() {
        let error = PublicRecord::parse("PUBLIC zz 0 foo").unwrap_err();
        assert_eq!(
            error.to_string(),
            "failed to parse PUBLIC record: expected hex number"
        );
    }

    #[test]
    fn test_parse_line_record() {
        let record = LineRecord::parse("1730 6 93 20").unwrap();
        assert_eq!(
            record,
            LineRecord {
                address: 0x1730,
                size: 0x6,
                line: 93,
                file_id: 20,
            }
        );
    }

    #[test]
    fn test_parse_line_record_negative_line() {
        let record = LineRecord::parse("e0fd10 5 -376 2225").unwrap();
        assert_eq!(record.line, 0);
    }

    #[test]
    fn test_parse_line_record_trailing() {
        assert!(LineRecord::parse("1730 6 93 20 garbage").is_err());
    }
}
