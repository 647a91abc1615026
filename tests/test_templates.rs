extern crate dlang_demangler;

use dlang_demangler::demangle;

fn expect(input: &str, reference: &str) {
    match demangle(input) {
        Ok(demangled) => assert_eq!(demangled, reference, "for {:?}", input),
        Err(err) => panic!("demangling {:?} failed: {}", input, err),
    }
}

fn expect_failure(input: &str) {
    if let Ok(demangled) = demangle(input) {
        panic!("{:?} should not demangle, got {:?}", input, demangled);
    }
}

#[test]
fn type_parameters() {
    expect(
        "_D8demangle15__T4testTaTaTaZ4testFaaaZv",
        "demangle.test!(char, char, char).test(char, char, char)",
    );
    expect(
        "_D8demangle13__T4testTaTiZ4testFaiZv",
        "demangle.test!(char, int).test(char, int)",
    );
    // Specialised parameters carry an extra prefix.
    expect("_D8demangle12__T4testHTaZ4testFZv", "demangle.test!(char).test()");
    // Instances without a length prefix.
    expect(
        "_D8demangle__T4testTaZ4testFaZv",
        "demangle.test!(char).test(char)",
    );
    expect(
        "_D3std5regex9Internals15__T8escapeReTaZ8escapeReFAaZAya",
        "std.regex.Internals.escapeRe!(char).escapeRe(char[])",
    );
    expect(
        "_D3foo10__T3BarTiZ3Bar6__initZ",
        "initializer for foo.Bar!(int).Bar",
    );
}

#[test]
fn integer_values() {
    expect("_D8demangle13__T4testVii8Z4testFZv", "demangle.test!(8).test()");
    expect("_D8demangle12__T4testVi8Z4testFZv", "demangle.test!(8).test()");
    expect(
        "_D8demangle14__T4testViN10Z4testFZv",
        "demangle.test!(-10).test()",
    );
    expect(
        "_D8demangle14__T4testVki42Z4testFZv",
        "demangle.test!(42u).test()",
    );
    expect("_D8demangle13__T4testVti5Z4testFZv", "demangle.test!(5u).test()");
    expect("_D8demangle13__T4testVhi5Z4testFZv", "demangle.test!(5u).test()");
    expect("_D8demangle13__T4testVli5Z4testFZv", "demangle.test!(5L).test()");
    expect("_D8demangle13__T4testVmi5Z4testFZv", "demangle.test!(5uL).test()");
    // Integer literals are carried digit for digit, beyond the range
    // that lengths and counts are held to.
    expect(
        "_D8demangle32__T4testVmi18446744073709551615Z4testFZv",
        "demangle.test!(18446744073709551615uL).test()",
    );
}

#[test]
fn bool_and_null_values() {
    expect("_D8demangle13__T4testVbi1Z4testFZv", "demangle.test!(true).test()");
    expect(
        "_D8demangle13__T4testVbi0Z4testFZv",
        "demangle.test!(false).test()",
    );
    expect("_D8demangle12__T4testVnnZ4testFZv", "demangle.test!(null).test()");
}

#[test]
fn character_values() {
    expect("_D8demangle14__T4testVai97Z4testFZv", "demangle.test!('a').test()");
    expect(
        "_D8demangle13__T4testVai9Z4testFZv",
        "demangle.test!('\\x09').test()",
    );
    expect(
        "_D8demangle15__T4testVui952Z4testFZv",
        "demangle.test!('\\u03b8').test()",
    );
    expect(
        "_D8demangle15__T4testVwi120Z4testFZv",
        "demangle.test!('\\U00000078').test()",
    );
}

#[test]
fn real_values() {
    expect(
        "_D8demangle17__T4testVeeA8CP4Z4testFZv",
        "demangle.test!(0xA.8Cp4).test()",
    );
    expect(
        "_D8demangle17__T4testVeeN18P2Z4testFZv",
        "demangle.test!(-0x1.8p2).test()",
    );
    expect(
        "_D8demangle17__T4testVee18PN2Z4testFZv",
        "demangle.test!(0x1.8p-2).test()",
    );
    expect("_D8demangle15__T4testVeeNANZ4testFZv", "demangle.test!(NaN).test()");
    expect("_D8demangle15__T4testVeeINFZ4testFZv", "demangle.test!(Inf).test()");
    expect(
        "_D8demangle16__T4testVeeNINFZ4testFZv",
        "demangle.test!(-Inf).test()",
    );
    expect(
        "_D8demangle21__T4testVqc18P1c12P1Z4testFZv",
        "demangle.test!(0x1.8p1+0x1.2p1i).test()",
    );
}

#[test]
fn string_values() {
    expect(
        "_D8demangle22__T4testVAyaa3_616263Z4testFZv",
        "demangle.test!(\"abc\").test()",
    );
    expect(
        "_D8demangle22__T4testVAyuw3_616263Z4testFZv",
        "demangle.test!(\"abc\"w).test()",
    );
    expect(
        "_D8demangle22__T4testVAywd3_616263Z4testFZv",
        "demangle.test!(\"abc\"d).test()",
    );
    expect(
        "_D8demangle18__T4testVAyaa1_20Z4testFZv",
        "demangle.test!(\" \").test()",
    );
    expect(
        "_D8demangle24__T4testVAyaa4_090a0d00Z4testFZv",
        "demangle.test!(\"\\t\\n\\r\\x00\").test()",
    );
    expect(
        "_D8demangle20__T4testVAyaa2_0c0bZ4testFZv",
        "demangle.test!(\"\\f\\v\").test()",
    );
    // The hex spelling of an escaped byte is carried through as it
    // appeared in the symbol.
    expect(
        "_D8demangle18__T4testVAyaa1_ffZ4testFZv",
        "demangle.test!(\"\\xff\").test()",
    );
    expect(
        "_D8demangle18__T4testVAyaa1_FFZ4testFZv",
        "demangle.test!(\"\\xFF\").test()",
    );
}

#[test]
fn aggregate_values() {
    expect(
        "_D8demangle18__T4testVAiA2i1i2Z4testFZv",
        "demangle.test!([1, 2]).test()",
    );
    expect(
        "_D8demangle23__T4testVHiiA2i1i2i3i4Z4testFZv",
        "demangle.test!([1:2, 3:4]).test()",
    );
    // Element values render under the element type of the array.
    expect(
        "_D8demangle18__T4testVAbA2i1i0Z4testFZv",
        "demangle.test!([true, false]).test()",
    );
    expect(
        "_D8demangle18__T4testVAmA2i1i2Z4testFZv",
        "demangle.test!([1uL, 2uL]).test()",
    );
    expect(
        "_D8demangle23__T4testVAAmA2A1i1A1i2Z4testFZv",
        "demangle.test!([[1uL], [2uL]]).test()",
    );
    expect(
        "_D8demangle23__T4testVHbmA2i1i5i0i7Z4testFZv",
        "demangle.test!([true:5uL, false:7uL]).test()",
    );
    expect(
        "_D8demangle30__T4testVS8demangle3FooS2i1i2Z4testFZv",
        "demangle.test!(demangle.Foo(1, 2)).test()",
    );
}

#[test]
fn function_literal_values() {
    expect(
        "_D8demangle39__T4testVPFZvf_D8demangle9__lambda1FZvZ4testFZv",
        "demangle.test!(demangle.__lambda1()).test()",
    );
}

#[test]
fn symbol_parameters() {
    expect(
        "_D8demangle28__T4testS_D8demangle3fooFZvZ4testFZv",
        "demangle.test!(demangle.foo()).test()",
    );
    expect(
        "_D8demangle19__T4testS83foo3barZ4testFZv",
        "demangle.test!(foo.bar).test()",
    );
    // The length prefix of a symbol runs straight into a symbol that
    // itself starts with a digit; the shorter length wins here.
    expect(
        "_D8demangle15__T4testS43fooZ4testFZv",
        "demangle.test!(foo).test()",
    );
}

#[test]
fn external_parameters() {
    expect(
        "_D8demangle16__T4testX5helloZ4testFZv",
        "demangle.test!(hello).test()",
    );
}

#[test]
fn invalid_templates() {
    // Declared length does not match the parsed span.
    expect_failure("_D8demangle14__T4testTaZ4testFaZv");
    // Truncated instance.
    expect_failure("_D8demangle12__T4testTa");
    // Unknown parameter kind.
    expect_failure("_D8demangle12__T4testW1xZ4testFZv");
    // String literal with a dangling hex digit.
    expect_failure("_D8demangle22__T4testVAyaa3_61626Z4testFZv");
    // Complex value missing its second half.
    expect_failure("_D8demangle14__T4testVqc18P1Z4testFZv");
    // Anonymous template name.
    expect_failure("_D8demangle11__T04testTaZ4testFZv");
}
