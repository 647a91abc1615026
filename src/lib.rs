//! dlang-demangler is a crate for Rust that can demangle symbols emitted
//! by compilers for the D programming language.  These symbols use the
//! mangling scheme documented in the D ABI at
//! <https://dlang.org/spec/abi.html#name_mangling>.
//!
//! # Example
//!
//! ```
//! use dlang_demangler;
//! let result = dlang_demangler::demangle("_D8demangle4testFaZv").unwrap();
//! assert_eq!(result, "demangle.test(char)");
//! ```
//!
//! # Behavior
//!
//! Demangling is all or nothing: either the entire symbol parses and a
//! readable name is returned, or an error is.  There is no partial or
//! best effort output.  Compiler generated symbols such as static
//! initializers, vtables and ClassInfo render as readable descriptions
//! ("initializer for foo.Bar" and so on), matching the output of the
//! demanglers embedded in binutils and LLVM.
//!
//! # License
//!
//! This crate is licensed under the MIT license.

#![deny(missing_debug_implementations)]
#![deny(unsafe_code)]

#[macro_use]
extern crate bitflags;

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::io;
use std::io::Write;
use std::result;
use std::str;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

pub struct Error {
    repr: ErrorRepr,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.repr, f)
    }
}

#[derive(Debug)]
pub enum ErrorRepr {
    FromUtf8(FromUtf8Error),
    Utf8(Utf8Error),
    Io(io::Error),
    ParseError(Cow<'static, str>, String, usize),
    Other(String),
}

impl Error {
    /// Creates a simple error message.
    pub fn new<S: Into<String>>(s: S) -> Error {
        Error {
            repr: ErrorRepr::Other(s.into()),
        }
    }

    fn new_parse_error(s: Cow<'static, str>, input: &str, offset: usize) -> Error {
        let context = Cow::Borrowed(input.as_bytes().get(offset..).unwrap_or(&[]));
        let context = if context.len() > 20 {
            Cow::Owned(format!("{}...", String::from_utf8_lossy(&context[..20])))
        } else {
            String::from_utf8_lossy(&context)
        };
        Error {
            repr: ErrorRepr::ParseError(s, context.to_string(), offset),
        }
    }

    /// Returns the offset in the input where the error happened.
    pub fn offset(&self) -> Option<usize> {
        match self.repr {
            ErrorRepr::ParseError(_, _, offset) => Some(offset),
            _ => None,
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error {
            repr: ErrorRepr::Utf8(err),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Error {
        Error {
            repr: ErrorRepr::FromUtf8(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error {
            repr: ErrorRepr::Io(err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.repr {
            ErrorRepr::FromUtf8(ref e) => Some(&*e),
            ErrorRepr::Utf8(ref e) => Some(&*e),
            ErrorRepr::Io(ref e) => Some(&*e),
            ErrorRepr::ParseError(..) => None,
            ErrorRepr::Other(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.repr {
            ErrorRepr::FromUtf8(ref e) => fmt::Display::fmt(e, f),
            ErrorRepr::Utf8(ref e) => fmt::Display::fmt(e, f),
            ErrorRepr::Io(ref e) => fmt::Display::fmt(e, f),
            ErrorRepr::ParseError(ref msg, ref context, offset) => {
                write!(f, "{} (offset: {}, remaining: {:?})", msg, offset, context)
            }
            ErrorRepr::Other(ref msg) => write!(f, "{}", msg),
        }
    }
}

type Result<T> = result::Result<T, Error>;

const TOP_LEVEL_CAPACITY: usize = 1024;
const SCRATCH_CAPACITY: usize = 32;

bitflags! {
    /// Type qualifiers.  They annotate the `this` reference of member
    /// functions and prefix delegate types.
    struct TypeModifiers: u32 {
        const SHARED    = 0b0001;
        const INOUT     = 0b0010;
        const CONST     = 0b0100;
        const IMMUTABLE = 0b1000;
    }
}

impl TypeModifiers {
    // Mangled order is shared, inout, const/immutable; rendering in the
    // same order keeps canonical symbols stable.
    fn write(self, out: &mut OutputBuffer) {
        if self.contains(TypeModifiers::SHARED) {
            out.append(" shared");
        }
        if self.contains(TypeModifiers::INOUT) {
            out.append(" inout");
        }
        if self.contains(TypeModifiers::CONST) {
            out.append(" const");
        }
        if self.contains(TypeModifiers::IMMUTABLE) {
            out.append(" immutable");
        }
    }
}

// Buffer the demangled name is assembled in.  Mostly append only; the
// handful of compiler generated symbols that render as "xxx for name"
// need prepend, and speculative parses roll back by truncating to a
// previously saved position.
struct OutputBuffer {
    buf: Vec<u8>,
}

impl OutputBuffer {
    fn with_capacity(capacity: usize) -> OutputBuffer {
        OutputBuffer {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn position(&self) -> usize {
        self.buf.len()
    }

    fn append(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn append_buf(&mut self, other: &OutputBuffer) {
        self.buf.extend_from_slice(&other.buf);
    }

    fn prepend(&mut self, s: &str) {
        self.buf.splice(0..0, s.bytes());
    }

    fn truncate_to(&mut self, position: usize) {
        self.buf.truncate(position);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn into_string(self) -> Result<String> {
        Ok(String::from_utf8(self.buf)?)
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// Numbers in back references use base 26, with upper case letters as
// the leading digits and a single lower case letter terminating the
// sequence as the lowest digit.
//
//     NumberBackRef:
//         [a-z]
//         [A-Z] NumberBackRef
//
// Returns the decoded value and the number of bytes it occupied.  The
// value must fit in 32 bits and must not be zero.
fn decode_backref(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut val: u32 = 0;
    for (i, &c) in bytes.iter().enumerate() {
        if !char::from(c).is_ascii_alphabetic() {
            return None;
        }
        if val > (u32::MAX - 25) / 26 {
            return None;
        }
        val *= 26;
        if char::from(c).is_ascii_lowercase() {
            val += u32::from(c - b'a');
            if val == 0 {
                return None;
            }
            return Some((val, i + 1));
        }
        val += u32::from(c - b'A');
    }
    None
}

// The parser takes the main role in demangling symbols.  Each grammar
// production has a read_* function which advances the cursor past the
// bytes it consumed and appends the rendered form to an output buffer.
struct ParserState<'a> {
    // Mangled symbol.  read_* functions shorten this string as they
    // parse it.
    remaining: &'a [u8],

    // The original input.  Back references are measured as absolute
    // byte offsets into it, so it is retained for the whole parse.
    input: &'a str,

    // How many bytes we advanced.
    offset: usize,

    // Exclusive upper bound on where a type back reference may point.
    // Shrinks while nested back references resolve, which keeps chains
    // of references finite.
    last_backref: usize,
}

impl<'a> ParserState<'a> {
    fn fail(&self, s: &'static str) -> Error {
        Error::new_parse_error(Cow::Borrowed(s), self.input, self.offset)
    }

    fn fail_args(&self, args: fmt::Arguments) -> Error {
        Error::new_parse_error(Cow::Owned(format!("{}", args)), self.input, self.offset)
    }

    fn peek(&self) -> Option<u8> {
        self.remaining.first().cloned()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.remaining.get(n).cloned()
    }

    fn get(&mut self) -> Result<u8> {
        match self.peek() {
            Some(first) => {
                self.advance(1);
                Ok(first)
            }
            None => Err(self.fail("unexpected end of input")),
        }
    }

    fn consume(&mut self, s: &[u8]) -> bool {
        if self.remaining.starts_with(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    fn advance(&mut self, len: usize) {
        let new_remaining = self.remaining.get(len..).unwrap_or(&[]);
        self.offset += self.remaining.len() - new_remaining.len();
        self.remaining = new_remaining;
    }

    // Repositions the cursor to an absolute offset.  Used to resolve
    // back references and to roll back speculative parses.
    fn jump(&mut self, pos: usize) {
        self.offset = pos;
        self.remaining = &self.input.as_bytes()[pos..];
    }

    fn expect(&mut self, s: &[u8]) -> Result<()> {
        if !self.consume(s) {
            Err(self.fail_args(format_args!("{} expected", str::from_utf8(s)?,)))
        } else {
            Ok(())
        }
    }

    // Decimal numbers mangle as a run of ASCII digits.
    //
    //     Number:
    //         Digit
    //         Digit Number
    //
    // A value beyond the unsigned 32-bit range is an error, as is a
    // number that runs into the end of the input: every number is a
    // count or length describing bytes that follow it.
    fn read_number(&mut self) -> Result<u32> {
        if !self.peek().map_or(false, |c| char::from(c).is_digit(10)) {
            return Err(self.fail("expected digit"));
        }
        let mut val: u32 = 0;
        while let Some(c) = self.peek() {
            if !char::from(c).is_digit(10) {
                break;
            }
            let digit = u32::from(c - b'0');
            if val > (u32::MAX - digit) / 10 {
                return Err(self.fail("number too large"));
            }
            val = val * 10 + digit;
            self.advance(1);
        }
        if self.remaining.is_empty() {
            return Err(self.fail("unexpected end of input"));
        }
        Ok(val)
    }

    // Reads two hex digits, of either case, and packs them into a byte.
    fn read_hex_pair(&mut self) -> Result<u8> {
        fn hex(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }

        match (self.peek().and_then(hex), self.peek_at(1).and_then(hex)) {
            (Some(hi), Some(lo)) => {
                self.advance(2);
                Ok(hi << 4 | lo)
            }
            _ => Err(self.fail("expected hex digit pair")),
        }
    }

    fn read_backref_offset(&mut self) -> Result<usize> {
        match decode_backref(self.remaining) {
            Some((val, used)) => {
                self.advance(used);
                Ok(val as usize)
            }
            None => Err(self.fail("invalid back reference encoding")),
        }
    }

    // Resolves the `Q` at the cursor to the absolute position of the
    // term it references.  The offset counts backwards from the `Q`
    // itself and must stay within the input.
    fn read_backref_target(&mut self) -> Result<usize> {
        let qpos = self.offset;
        self.expect(b"Q")?;
        let refpos = self.read_backref_offset()?;
        if refpos > qpos {
            return Err(self.fail("back reference out of bounds"));
        }
        Ok(qpos - refpos)
    }

    // An identifier back reference always points at a plain length
    // prefixed name, never at another back reference or a template
    // instance.
    //
    //     IdentifierBackRef:
    //         Q NumberBackRef
    fn read_symbol_backref(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let target = self.read_backref_target()?;
        let resume = self.offset;

        self.jump(target);
        let len = self.read_number()?;
        if self.remaining.len() < len as usize {
            return Err(self.fail("identifier length exceeds input"));
        }
        self.read_lname(out, len)?;

        self.jump(resume);
        Ok(())
    }

    //     TypeBackRef:
    //         Q NumberBackRef
    fn read_type_backref(&mut self, out: &mut OutputBuffer, is_function: bool) -> Result<()> {
        // A chain of type back references must move strictly towards
        // the start of the input; anything else would never terminate.
        if self.offset >= self.last_backref {
            return Err(self.fail("recursive back reference"));
        }
        let saved_backref = self.last_backref;
        self.last_backref = self.offset;

        let result = self.read_type_backref_target(out, is_function);

        self.last_backref = saved_backref;
        result
    }

    fn read_type_backref_target(
        &mut self,
        out: &mut OutputBuffer,
        is_function: bool,
    ) -> Result<()> {
        let target = self.read_backref_target()?;
        let resume = self.offset;

        self.jump(target);
        if is_function {
            self.read_function_type(out)?;
        } else {
            self.read_type(out)?;
        }

        self.jump(resume);
        Ok(())
    }

    // Check whether the bytes at POS begin a symbol name: a length
    // prefixed identifier, a raw template instance, or a back reference
    // landing on one.
    fn is_symbol_name_at(&self, pos: usize) -> bool {
        let bytes = &self.input.as_bytes()[pos..];
        match bytes.first().cloned() {
            Some(c) if char::from(c).is_digit(10) => true,
            Some(b'_') => bytes.starts_with(b"__T") || bytes.starts_with(b"__U"),
            Some(b'Q') => match decode_backref(&bytes[1..]) {
                Some((val, _)) => {
                    let val = val as usize;
                    val <= pos && char::from(self.input.as_bytes()[pos - val]).is_digit(10)
                }
                None => false,
            },
            _ => false,
        }
    }

    fn is_symbol_name(&self) -> bool {
        self.is_symbol_name_at(self.offset)
    }

    fn is_call_convention(&self) -> bool {
        match self.peek() {
            Some(b'F') | Some(b'U') | Some(b'V') | Some(b'W') | Some(b'R') | Some(b'Y') => true,
            _ => false,
        }
    }

    // Resolve the type tag at POS, following back references to the
    // byte they land on.  Returns the tag and its absolute position.
    fn resolve_type_tag(&self, pos: usize) -> Option<(u8, usize)> {
        let bytes = self.input.as_bytes();
        let mut pos = pos;
        loop {
            match bytes.get(pos).cloned() {
                Some(b'Q') => {
                    let (refpos, _) = decode_backref(&bytes[pos + 1..])?;
                    let refpos = refpos as usize;
                    if refpos > pos {
                        return None;
                    }
                    pos -= refpos;
                }
                Some(tag) => return Some((tag, pos)),
                None => return None,
            }
        }
    }

    // Where the type starting at POS ends.  Runs the type grammar into
    // a sink and restores the cursor afterwards.
    fn type_extent(&mut self, pos: usize) -> Option<usize> {
        let resume = self.offset;
        let mut sink = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
        self.jump(pos);
        let end = match self.read_type(&mut sink) {
            Ok(()) => Some(self.offset),
            Err(_) => None,
        };
        self.jump(resume);
        end
    }

    // An entire mangled symbol.
    //
    //     MangledName:
    //         _D QualifiedName Type
    //         _D QualifiedName Z
    //
    // The caller has verified the `_D` prefix.  The trailing type is
    // the declaration or return type of the symbol; the rendered form
    // already carries the argument list in the qualified name, so the
    // type is parsed for validation and dropped.  Artificial symbols
    // end with `Z` and have no type.
    fn read_mangle(&mut self, out: &mut OutputBuffer) -> Result<()> {
        self.advance(2);
        self.read_qualified(out, true)?;

        if self.peek() == Some(b'Z') {
            self.advance(1);
        } else {
            let mut dropped = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
            self.read_type(&mut dropped)?;
        }
        Ok(())
    }

    // Qualified names are symbol names separated by dots.
    //
    //     QualifiedName:
    //         SymbolFunctionName
    //         SymbolFunctionName QualifiedName
    //
    //     SymbolFunctionName:
    //         SymbolName
    //         SymbolName TypeFunctionNoReturn
    //         SymbolName M TypeFunctionNoReturn
    //         SymbolName M TypeModifiers TypeFunctionNoReturn
    //
    // Nested function symbols encode their argument types but not their
    // return type.  SUFFIX_MODIFIERS selects whether the modifiers of a
    // member function render after its parameter list; the top level
    // wants them, named type references do not.
    fn read_qualified(&mut self, out: &mut OutputBuffer, suffix_modifiers: bool) -> Result<()> {
        let mut n = 0;
        loop {
            if self.peek() == Some(b'0') {
                // Skip over anonymous symbols.
                while self.peek() == Some(b'0') {
                    self.advance(1);
                }
            } else {
                if n != 0 {
                    out.append(".");
                }
                n += 1;

                self.read_identifier(out)?;

                // A function symbol follows its name with the encoded
                // argument types.  The probe can misfire, because the
                // declaration type of a variable also starts with a
                // calling convention letter, so roll back unless it
                // leaves a valid continuation behind.
                if self.peek() == Some(b'M') || self.is_call_convention() {
                    let probe_start = self.offset;
                    let saved_position = out.position();
                    let mut mods = TypeModifiers::empty();

                    // Skip over the `this` parameter and its modifiers.
                    let mut matched = true;
                    if self.consume(b"M") {
                        match self.read_type_modifiers() {
                            Ok(parsed) => mods = parsed,
                            Err(_) => matched = false,
                        }
                    }
                    if matched {
                        matched = self
                            .read_function_type_noreturn(Some(&mut *out), None, None)
                            .is_ok();
                    }
                    if matched && suffix_modifiers {
                        mods.write(out);
                    }
                    if !matched || self.remaining.is_empty() {
                        // Did not match the rule we were looking for.
                        self.jump(probe_start);
                        out.truncate_to(saved_position);
                    }
                }
            }

            if !self.is_symbol_name() {
                return Ok(());
            }
        }
    }

    // A symbol name is either a back reference, a template instance or
    // a length prefixed identifier.
    //
    //     SymbolName:
    //         LName
    //         TemplateInstanceName
    //         IdentifierBackRef
    fn read_identifier(&mut self, out: &mut OutputBuffer) -> Result<()> {
        if self.remaining.is_empty() {
            return Err(self.fail("unexpected end of input"));
        }
        if self.peek() == Some(b'Q') {
            return self.read_symbol_backref(out);
        }

        // Template instances can appear without a length prefix.
        if self.remaining.starts_with(b"__T") || self.remaining.starts_with(b"__U") {
            return self.read_template(out, None);
        }

        let len = self.read_number()?;
        if len == 0 {
            return Err(self.fail("bad identifier length"));
        }
        if self.remaining.len() < len as usize {
            return Err(self.fail("identifier length exceeds input"));
        }

        if len >= 5 && (self.remaining.starts_with(b"__T") || self.remaining.starts_with(b"__U")) {
            return self.read_template(out, Some(len));
        }

        // Multiple declarations in one function can share a mangled
        // name; a fake parent of the form `__Sddd` makes them unique.
        // It carries no name of its own.
        if len >= 4 && self.remaining.starts_with(b"__S") {
            let digits = &self.remaining[3..len as usize];
            if digits.iter().all(|&c| char::from(c).is_digit(10)) {
                self.advance(len as usize);
                return self.read_identifier(out);
            }
        }

        self.read_lname(out, len)
    }

    // Plain identifiers are emitted verbatim, except for the compiler
    // generated symbols below, which render as readable text.  The
    // prepend forms retract one byte afterwards to swallow the dot that
    // was emitted before the identifier.  Their trailing `Z` is left in
    // place for the artificial symbol rule; the postblit consumes its
    // whole `MFZ` signature.
    fn read_lname(&mut self, out: &mut OutputBuffer, len: u32) -> Result<()> {
        let len = len as usize;
        let name = match self.remaining.get(..len) {
            Some(name) => name,
            None => return Err(self.fail("identifier length exceeds input")),
        };

        match len {
            6 => {
                if name == b"__ctor" {
                    // Constructor symbol for a class or struct.
                    out.append("this");
                    self.advance(len);
                    return Ok(());
                }
                if name == b"__dtor" {
                    out.append("~this");
                    self.advance(len);
                    return Ok(());
                }
                if self.remaining.starts_with(b"__initZ") {
                    // Static initializer for a symbol.
                    out.prepend("initializer for ");
                    out.truncate_to(out.position() - 1);
                    self.advance(len);
                    return Ok(());
                }
                if self.remaining.starts_with(b"__vtblZ") {
                    out.prepend("vtable for ");
                    out.truncate_to(out.position() - 1);
                    self.advance(len);
                    return Ok(());
                }
            }
            7 => {
                if self.remaining.starts_with(b"__ClassZ") {
                    out.prepend("ClassInfo for ");
                    out.truncate_to(out.position() - 1);
                    self.advance(len);
                    return Ok(());
                }
            }
            10 => {
                if self.remaining.starts_with(b"__postblitMFZ") {
                    out.append("this(this)");
                    self.advance(len + 3);
                    return Ok(());
                }
            }
            11 => {
                if self.remaining.starts_with(b"__InterfaceZ") {
                    out.prepend("Interface for ");
                    out.truncate_to(out.position() - 1);
                    self.advance(len);
                    return Ok(());
                }
            }
            12 => {
                if self.remaining.starts_with(b"__ModuleInfoZ") {
                    out.prepend("ModuleInfo for ");
                    out.truncate_to(out.position() - 1);
                    self.advance(len);
                    return Ok(());
                }
            }
            _ => {}
        }

        out.append_bytes(name);
        self.advance(len);
        Ok(())
    }

    // Template instance names carry the types and values of the
    // parameters the instance was created with.
    //
    //     TemplateInstanceName:
    //         Number __T LName TemplateArgs Z
    //         Number __U LName TemplateArgs Z
    //
    // LEN is the decoded number, or None for an instance that appeared
    // without a length prefix.
    fn read_template(&mut self, out: &mut OutputBuffer, len: Option<u32>) -> Result<()> {
        let start = self.offset;

        if !self.is_symbol_name_at(self.offset + 3)
            || self.input.as_bytes().get(self.offset + 3) == Some(&b'0')
        {
            return Err(self.fail("invalid template instance name"));
        }
        self.advance(3);

        self.read_identifier(out)?;

        let mut args = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
        self.read_template_args(&mut args)?;

        out.append("!(");
        out.append_buf(&args);
        out.append(")");

        if let Some(len) = len {
            if self.offset - start != len as usize {
                return Err(self.fail("template instance length mismatch"));
            }
        }
        Ok(())
    }

    //     TemplateArgs:
    //         TemplateArg
    //         TemplateArg TemplateArgs
    //
    //     TemplateArg:
    //         TemplateArgX
    //         H TemplateArgX
    //
    //     TemplateArgX:
    //         S TemplateSymbolParameter
    //         T Type
    //         V Type Value
    //         X Number ExternallyMangledName
    fn read_template_args(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let mut n = 0;
        while let Some(c) = self.peek() {
            if c == b'Z' {
                // End of parameter list.
                self.advance(1);
                return Ok(());
            }

            if n != 0 {
                out.append(", ");
            }
            n += 1;

            // Skip over the specialised parameter prefix.
            if self.peek() == Some(b'H') {
                self.advance(1);
            }

            match self.peek() {
                Some(b'S') => {
                    self.advance(1);
                    self.read_template_symbol_param(out)?;
                }
                Some(b'T') => {
                    self.advance(1);
                    self.read_type(out)?;
                }
                Some(b'V') => {
                    self.advance(1);

                    // The value grammar depends on its type, and in the
                    // few cases the type is wanted in the output it has
                    // to precede the value.  A back reference is peeked
                    // through for the tag byte only; the guarded parse
                    // below does the real work.
                    let type_pos = self.offset;
                    let mut tag = self.peek().unwrap_or(0);
                    let mut value_pos = type_pos;
                    if tag == b'Q' {
                        match self.resolve_type_tag(type_pos) {
                            Some((resolved, pos)) => {
                                tag = resolved;
                                value_pos = pos;
                            }
                            None => return Err(self.fail("invalid back reference encoding")),
                        }
                    }

                    let mut value_type = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
                    self.read_type(&mut value_type)?;
                    self.read_value(out, Some(value_type.as_bytes()), tag, Some(value_pos))?;
                }
                Some(b'X') => {
                    self.advance(1);
                    let len = self.read_number()? as usize;
                    if self.remaining.len() < len {
                        return Err(self.fail("parameter length exceeds input"));
                    }
                    out.append_bytes(&self.remaining[..len]);
                    self.advance(len);
                }
                _ => return Err(self.fail("unknown template parameter")),
            }
        }
        Ok(())
    }

    // A symbol passed as a template parameter: a complete nested mangle,
    // a back reference, or a length prefixed qualified name.
    fn read_template_symbol_param(&mut self, out: &mut OutputBuffer) -> Result<()> {
        if self.remaining.starts_with(b"_D") && self.is_symbol_name_at(self.offset + 2) {
            return self.read_mangle(out);
        }
        if self.peek() == Some(b'Q') {
            return self.read_qualified(out, false);
        }

        let digits_start = self.offset;
        let len = self.read_number()? as usize;
        if len == 0 {
            return Err(self.fail("bad symbol parameter length"));
        }
        let digits_end = self.offset;

        // Frontends up to 2.076 mangled these symbols with the template
        // instance as root, and the length prefix runs straight into a
        // symbol that can itself begin with digits.  Disambiguate by
        // working backwards from the longest possible length until a
        // parse consumes exactly the bytes its prefix claims.
        for split in (digits_start + 1..=digits_end).rev() {
            let mut candidate: usize = 0;
            for &c in &self.input.as_bytes()[digits_start..split] {
                candidate = candidate * 10 + (c - b'0') as usize;
            }
            if candidate == 0 || candidate > self.input.len() - split {
                continue;
            }

            let saved_position = out.position();
            self.jump(split);
            if self.read_qualified(out, false).is_ok() && self.offset == split + candidate {
                return Ok(());
            }
            out.truncate_to(saved_position);
        }

        self.jump(digits_start);
        Err(self.fail("invalid template symbol parameter"))
    }

    // A literal value in a template instance name.  TAG is the type
    // tag the value was declared with; it selects integer suffixes and
    // character widths.  TYPE_POS is where that type lives in the
    // input, used to recover the element types of array literals.
    // NAME is the rendered type, wanted only by struct literals.
    fn read_value(
        &mut self,
        out: &mut OutputBuffer,
        name: Option<&[u8]>,
        tag: u8,
        type_pos: Option<usize>,
    ) -> Result<()> {
        match self.peek() {
            None => Err(self.fail("unexpected end of input")),
            Some(b'n') => {
                self.advance(1);
                out.append("null");
                Ok(())
            }
            Some(b'N') => {
                self.advance(1);
                out.append("-");
                self.read_integer_value(out, tag)
            }
            Some(b'i') => {
                // An `i` should precede encoded numbers, but early
                // frontends did not always emit it, so bare digits are
                // accepted below as well.
                self.advance(1);
                self.read_integer_value(out, tag)
            }
            Some(c) if char::from(c).is_digit(10) => self.read_integer_value(out, tag),
            Some(b'e') => {
                self.advance(1);
                self.read_real_value(out)
            }
            Some(b'c') => {
                self.advance(1);
                self.read_real_value(out)?;
                out.append("+");
                self.expect(b"c")?;
                self.read_real_value(out)?;
                out.append("i");
                Ok(())
            }
            Some(b'a') | Some(b'w') | Some(b'd') => self.read_string_value(out),
            Some(b'A') => {
                self.advance(1);
                if tag == b'H' {
                    // The key type sits right after the `H`; the value
                    // type starts wherever the key ends.
                    let key = match type_pos {
                        Some(pos) => self.resolve_type_tag(pos + 1),
                        None => None,
                    };
                    let value = match type_pos {
                        Some(pos) => self
                            .type_extent(pos + 1)
                            .and_then(|end| self.resolve_type_tag(end)),
                        None => None,
                    };
                    self.read_assoc_array_literal(out, key, value)
                } else {
                    let element = match type_pos {
                        Some(pos) if tag == b'A' => self.resolve_type_tag(pos + 1),
                        _ => None,
                    };
                    self.read_array_literal(out, element)
                }
            }
            Some(b'S') => {
                self.advance(1);
                self.read_struct_literal(out, name)
            }
            Some(b'f') => {
                // Function literals mangle as a complete nested symbol.
                self.advance(1);
                if self.remaining.starts_with(b"_D") && self.is_symbol_name_at(self.offset + 2) {
                    self.read_mangle(out)
                } else {
                    Err(self.fail("invalid function literal symbol"))
                }
            }
            Some(_) => Err(self.fail("unknown value")),
        }
    }

    fn read_integer_value(&mut self, out: &mut OutputBuffer, tag: u8) -> Result<()> {
        match tag {
            b'a' | b'u' | b'w' => {
                // Character values.  Printable chars render literally,
                // everything else as an escape of the width the
                // character type implies.
                let val = self.read_number()?;
                out.append("'");
                if tag == b'a' && val >= 0x20 && val < 0x7f {
                    out.append_bytes(&[val as u8]);
                } else {
                    match tag {
                        b'a' => write!(out, "\\x{:02x}", val)?,
                        b'u' => write!(out, "\\u{:04x}", val)?,
                        _ => write!(out, "\\U{:08x}", val)?,
                    }
                }
                out.append("'");
                Ok(())
            }
            b'b' => {
                let val = self.read_number()?;
                out.append(if val != 0 { "true" } else { "false" });
                Ok(())
            }
            _ => {
                // Plain integers keep their digits as they are; they
                // are not bounded the way counts and lengths are.
                let digits_start = self.offset;
                while self.peek().map_or(false, |c| char::from(c).is_digit(10)) {
                    self.advance(1);
                }
                if self.offset == digits_start {
                    return Err(self.fail("expected digit"));
                }
                out.append_bytes(&self.input.as_bytes()[digits_start..self.offset]);

                match tag {
                    b'h' | b't' | b'k' => out.append("u"),
                    b'l' => out.append("L"),
                    b'm' => out.append("uL"),
                    _ => {}
                }
                Ok(())
            }
        }
    }

    // Floating point values mangle as hexadecimal floats.
    //
    //     HexFloat:
    //         NAN
    //         INF
    //         NINF
    //         N HexDigits P Exponent
    //         HexDigits P Exponent
    fn read_real_value(&mut self, out: &mut OutputBuffer) -> Result<()> {
        if self.consume(b"NAN") {
            out.append("NaN");
            return Ok(());
        }
        if self.consume(b"INF") {
            out.append("Inf");
            return Ok(());
        }
        if self.consume(b"NINF") {
            out.append("-Inf");
            return Ok(());
        }

        if self.consume(b"N") {
            out.append("-");
        }

        let lead = match self.peek() {
            Some(c) if char::from(c).is_digit(16) => c,
            _ => return Err(self.fail("expected hex digit")),
        };
        self.advance(1);
        out.append("0x");
        out.append_bytes(&[lead]);
        out.append(".");

        // Significand.
        let digits_start = self.offset;
        while self.peek().map_or(false, |c| char::from(c).is_digit(16)) {
            self.advance(1);
        }
        out.append_bytes(&self.input.as_bytes()[digits_start..self.offset]);

        // Exponent.
        self.expect(b"P")?;
        out.append("p");
        if self.consume(b"N") {
            out.append("-");
        }
        let digits_start = self.offset;
        while self.peek().map_or(false, |c| char::from(c).is_digit(10)) {
            self.advance(1);
        }
        out.append_bytes(&self.input.as_bytes()[digits_start..self.offset]);
        Ok(())
    }

    // String values carry their own width tag and length, then that
    // many hex coded bytes.
    //
    //     CharWidth Number _ HexDigits
    fn read_string_value(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let width = self.get()?;
        let len = self.read_number()?;
        self.expect(b"_")?;

        out.append("\"");
        for _ in 0..len {
            let raw = match self.remaining.get(..2) {
                Some(raw) => [raw[0], raw[1]],
                None => return Err(self.fail("unexpected end of input")),
            };
            let val = self.read_hex_pair()?;
            match val {
                b'\t' => out.append("\\t"),
                b'\n' => out.append("\\n"),
                b'\r' => out.append("\\r"),
                0x0c => out.append("\\f"),
                0x0b => out.append("\\v"),
                0x20..=0x7e => out.append_bytes(&[val]),
                _ => {
                    // Other non printable characters keep the spelling
                    // they had in the mangled symbol.
                    out.append("\\x");
                    out.append_bytes(&raw);
                }
            }
        }
        out.append("\"");

        if width != b'a' {
            out.append_bytes(&[width]);
        }
        Ok(())
    }

    // ELEMENT is the resolved tag and position of the element type,
    // when the enclosing type made it known.
    fn read_array_literal(
        &mut self,
        out: &mut OutputBuffer,
        element: Option<(u8, usize)>,
    ) -> Result<()> {
        let elements = self.read_number()?;
        out.append("[");
        for n in 0..elements {
            if n != 0 {
                out.append(", ");
            }
            match element {
                Some((tag, pos)) => self.read_value(out, None, tag, Some(pos))?,
                None => self.read_value(out, None, 0, None)?,
            }
        }
        out.append("]");
        Ok(())
    }

    fn read_assoc_array_literal(
        &mut self,
        out: &mut OutputBuffer,
        key: Option<(u8, usize)>,
        value: Option<(u8, usize)>,
    ) -> Result<()> {
        let elements = self.read_number()?;
        out.append("[");
        for n in 0..elements {
            if n != 0 {
                out.append(", ");
            }
            match key {
                Some((tag, pos)) => self.read_value(out, None, tag, Some(pos))?,
                None => self.read_value(out, None, 0, None)?,
            }
            out.append(":");
            match value {
                Some((tag, pos)) => self.read_value(out, None, tag, Some(pos))?,
                None => self.read_value(out, None, 0, None)?,
            }
        }
        out.append("]");
        Ok(())
    }

    fn read_struct_literal(&mut self, out: &mut OutputBuffer, name: Option<&[u8]>) -> Result<()> {
        let args = self.read_number()?;
        if let Some(name) = name {
            out.append_bytes(name);
        }
        out.append("(");
        for n in 0..args {
            if n != 0 {
                out.append(", ");
            }
            self.read_value(out, None, 0, None)?;
        }
        out.append(")");
        Ok(())
    }

    fn read_tuple(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let elements = self.read_number()?;
        out.append("tuple(");
        for n in 0..elements {
            if n != 0 {
                out.append(", ");
            }
            self.read_type(out)?;
        }
        out.append(")");
        Ok(())
    }

    // The type grammar dispatches on a single byte.  Unknown tags are
    // errors, never skipped.
    fn read_type(&mut self, out: &mut OutputBuffer) -> Result<()> {
        match self.peek() {
            None => Err(self.fail("unexpected end of input")),

            Some(b'O') => {
                self.advance(1);
                out.append("shared(");
                self.read_type(out)?;
                out.append(")");
                Ok(())
            }
            Some(b'x') => {
                self.advance(1);
                out.append("const(");
                self.read_type(out)?;
                out.append(")");
                Ok(())
            }
            Some(b'y') => {
                self.advance(1);
                out.append("immutable(");
                self.read_type(out)?;
                out.append(")");
                Ok(())
            }

            Some(b'N') => match self.peek_at(1) {
                Some(b'g') => {
                    self.advance(2);
                    out.append("inout(");
                    self.read_type(out)?;
                    out.append(")");
                    Ok(())
                }
                Some(b'h') => {
                    self.advance(2);
                    out.append("__vector(");
                    self.read_type(out)?;
                    out.append(")");
                    Ok(())
                }
                Some(b'n') => {
                    self.advance(2);
                    out.append("typeof(*null)");
                    Ok(())
                }
                _ => Err(self.fail("unknown type")),
            },

            // Dynamic array T[].
            Some(b'A') => {
                self.advance(1);
                self.read_type(out)?;
                out.append("[]");
                Ok(())
            }

            // Static array T[N].
            Some(b'G') => {
                self.advance(1);
                let digits_start = self.offset;
                while self.peek().map_or(false, |c| char::from(c).is_digit(10)) {
                    self.advance(1);
                }
                let digits_end = self.offset;
                self.read_type(out)?;
                out.append("[");
                out.append_bytes(&self.input.as_bytes()[digits_start..digits_end]);
                out.append("]");
                Ok(())
            }

            // Associative array V[K]; the key type comes first in the
            // mangle but second in the rendering.
            Some(b'H') => {
                self.advance(1);
                let mut key = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
                self.read_type(&mut key)?;
                self.read_type(out)?;
                out.append("[");
                out.append_buf(&key);
                out.append("]");
                Ok(())
            }

            Some(b'P') => {
                self.advance(1);
                if self.is_call_convention() {
                    // Function pointer types have no trailing asterisk.
                    self.read_function_type(out)?;
                    out.append("function");
                } else {
                    self.read_type(out)?;
                    out.append("*");
                }
                Ok(())
            }
            Some(b'F') | Some(b'U') | Some(b'W') | Some(b'V') | Some(b'R') | Some(b'Y') => {
                self.read_function_type(out)?;
                out.append("function");
                Ok(())
            }

            // Named types: class, struct, enum, typedef.
            Some(b'C') | Some(b'S') | Some(b'E') | Some(b'T') => {
                self.advance(1);
                self.read_qualified(out, false)
            }

            Some(b'D') => {
                self.advance(1);
                let mods = self.read_type_modifiers()?;
                if self.peek() == Some(b'Q') {
                    self.read_type_backref(out, true)?;
                } else {
                    self.read_function_type(out)?;
                }
                out.append("delegate");
                mods.write(out);
                Ok(())
            }

            Some(b'B') => {
                self.advance(1);
                self.read_tuple(out)
            }

            Some(b'Q') => self.read_type_backref(out, false),

            Some(b'z') => match self.peek_at(1) {
                Some(b'i') => {
                    self.advance(2);
                    out.append("cent");
                    Ok(())
                }
                Some(b'k') => {
                    self.advance(2);
                    out.append("ucent");
                    Ok(())
                }
                _ => Err(self.fail("unknown type")),
            },

            Some(c) => {
                let name = match c {
                    b'n' => "typeof(null)",
                    b'v' => "void",
                    b'g' => "byte",
                    b'h' => "ubyte",
                    b's' => "short",
                    b't' => "ushort",
                    b'i' => "int",
                    b'k' => "uint",
                    b'l' => "long",
                    b'm' => "ulong",
                    b'f' => "float",
                    b'd' => "double",
                    b'e' => "real",
                    b'o' => "ifloat",
                    b'p' => "idouble",
                    b'j' => "ireal",
                    b'q' => "cfloat",
                    b'r' => "cdouble",
                    b'c' => "creal",
                    b'b' => "bool",
                    b'a' => "char",
                    b'u' => "wchar",
                    b'w' => "dchar",
                    _ => return Err(self.fail("unknown type")),
                };
                self.advance(1);
                out.append(name);
                Ok(())
            }
        }
    }

    //     TypeModifiers:
    //         Const
    //         Wild
    //         Shared
    //         Shared Const
    //         Shared Wild
    //         Immutable
    fn read_type_modifiers(&mut self) -> Result<TypeModifiers> {
        let mut mods = TypeModifiers::empty();
        loop {
            match self.peek() {
                Some(b'x') => {
                    self.advance(1);
                    mods |= TypeModifiers::CONST;
                }
                Some(b'y') => {
                    self.advance(1);
                    mods |= TypeModifiers::IMMUTABLE;
                }
                Some(b'O') => {
                    self.advance(1);
                    mods |= TypeModifiers::SHARED;
                }
                Some(b'N') => {
                    if self.peek_at(1) == Some(b'g') {
                        self.advance(2);
                        mods |= TypeModifiers::INOUT;
                    } else {
                        return Err(self.fail("unknown type modifier"));
                    }
                }
                Some(_) => return Ok(mods),
                None => return Err(self.fail("unexpected end of input")),
            }
        }
    }

    // The mangled order of a function type is
    //
    //     CallConvention FuncAttrs Arguments ArgClose Type
    //
    // while the rendered order is
    //
    //     CallConvention Type Arguments FuncAttrs
    //
    // so the pieces are collected separately and joined afterwards.
    fn read_function_type(&mut self, out: &mut OutputBuffer) -> Result<()> {
        if self.remaining.is_empty() {
            return Err(self.fail("unexpected end of input"));
        }

        let mut attrs = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
        let mut args = OutputBuffer::with_capacity(SCRATCH_CAPACITY);
        let mut return_type = OutputBuffer::with_capacity(SCRATCH_CAPACITY);

        self.read_function_type_noreturn(Some(&mut args), Some(&mut *out), Some(&mut attrs))?;
        self.read_type(&mut return_type)?;

        out.append_buf(&return_type);
        out.append_buf(&args);
        out.append(" ");
        out.append_buf(&attrs);
        Ok(())
    }

    // Everything of a function type except its return type.  Callers
    // pass None for the pieces they want parsed but not rendered; the
    // qualified name suffix keeps only the argument list.
    fn read_function_type_noreturn(
        &mut self,
        args: Option<&mut OutputBuffer>,
        call: Option<&mut OutputBuffer>,
        attrs: Option<&mut OutputBuffer>,
    ) -> Result<()> {
        let mut sink = OutputBuffer::with_capacity(SCRATCH_CAPACITY);

        match call {
            Some(out) => self.read_call_convention(out)?,
            None => self.read_call_convention(&mut sink)?,
        }
        match attrs {
            Some(out) => self.read_attributes(out)?,
            None => self.read_attributes(&mut sink)?,
        }
        match args {
            Some(out) => {
                out.append("(");
                self.read_function_args(out)?;
                out.append(")");
            }
            None => self.read_function_args(&mut sink)?,
        }
        Ok(())
    }

    // Function parameters with their storage classes, terminated by one
    // of the three closing tags.
    //
    //     Arguments:
    //         X       // (T t...) style variadic
    //         Y       // (T t, ...) style variadic
    //         Z       // fixed arity
    //         Parameter Arguments
    fn read_function_args(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let mut n = 0;
        while let Some(c) = self.peek() {
            match c {
                b'X' => {
                    self.advance(1);
                    out.append("...");
                    return Ok(());
                }
                b'Y' => {
                    self.advance(1);
                    if n != 0 {
                        out.append(", ");
                    }
                    out.append("...");
                    return Ok(());
                }
                b'Z' => {
                    self.advance(1);
                    return Ok(());
                }
                _ => {}
            }

            if n != 0 {
                out.append(", ");
            }
            n += 1;

            if self.consume(b"M") {
                out.append("scope ");
            }
            if self.consume(b"Nk") {
                out.append("return ");
            }
            match self.peek() {
                Some(b'I') => {
                    self.advance(1);
                    out.append("in ");
                    if self.consume(b"K") {
                        out.append("ref ");
                    }
                }
                Some(b'J') => {
                    self.advance(1);
                    out.append("out ");
                }
                Some(b'K') => {
                    self.advance(1);
                    out.append("ref ");
                }
                Some(b'L') => {
                    self.advance(1);
                    out.append("lazy ");
                }
                _ => {}
            }
            self.read_type(out)?;
        }
        Ok(())
    }

    //     CallConvention:
    //         F       // D
    //         U       // C
    //         W       // Windows
    //         V       // Pascal
    //         R       // C++
    //         Y       // Objective-C
    fn read_call_convention(&mut self, out: &mut OutputBuffer) -> Result<()> {
        match self.get()? {
            b'F' => {}
            b'U' => out.append("extern(C) "),
            b'W' => out.append("extern(Windows) "),
            b'V' => out.append("extern(Pascal) "),
            b'R' => out.append("extern(C++) "),
            b'Y' => out.append("extern(Objective-C) "),
            _ => return Err(self.fail("unknown calling convention")),
        }
        Ok(())
    }

    // Function attributes are `N` digraphs.  `Ng`, `Nh`, `Nk` and `Nn`
    // are not attributes; seeing one of them means the parameter list
    // has begun, so the `N` is left in place for it.
    fn read_attributes(&mut self, out: &mut OutputBuffer) -> Result<()> {
        if self.remaining.is_empty() {
            return Err(self.fail("unexpected end of input"));
        }
        while self.peek() == Some(b'N') {
            let attr = match self.peek_at(1) {
                Some(b'a') => "pure ",
                Some(b'b') => "nothrow ",
                Some(b'c') => "ref ",
                Some(b'd') => "@property ",
                Some(b'e') => "@trusted ",
                Some(b'f') => "@safe ",
                Some(b'i') => "@nogc ",
                Some(b'j') => "return ",
                Some(b'l') => "scope ",
                Some(b'm') => "@live ",
                Some(b'g') | Some(b'h') | Some(b'k') | Some(b'n') => break,
                _ => return Err(self.fail("unknown function attribute")),
            };
            self.advance(2);
            out.append(attr);
        }
        Ok(())
    }
}

/// Demangles a D symbol.
///
/// The input must be a complete mangled name beginning with `_D` (with
/// `_Dmain` as the only fixed name).  Any malformed, truncated or
/// unknown encoding is an error; no partial output is produced.
pub fn demangle(mangled: &str) -> Result<String> {
    if !mangled.starts_with("_D") {
        return Err(Error::new("not a D mangled symbol"));
    }
    if mangled == "_Dmain" {
        return Ok("D main".to_owned());
    }

    let mut state = ParserState {
        remaining: mangled.as_bytes(),
        input: mangled,
        offset: 0,
        last_backref: mangled.len(),
    };
    let mut out = OutputBuffer::with_capacity(TOP_LEVEL_CAPACITY);
    state.read_mangle(&mut out)?;

    // The parse has to account for every byte of the symbol.
    if !state.remaining.is_empty() {
        return Err(state.fail("trailing characters"));
    }
    if out.position() == 0 {
        return Err(Error::new("empty demangled name"));
    }
    out.into_string()
}
