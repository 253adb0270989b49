//! Reconstruction fidelity: parsing a file and reassembling the tree must
//! reproduce the input byte for byte, for every syntax shape the planner
//! may encounter.

use difference::{Changeset, Difference};
use itertools::Itertools;

use typeweld::cst::parse_module;

/// Parse and reassemble, failing with a readable line diff on drift.
fn assert_roundtrip(source: &str) {
    let module = match parse_module(source) {
        Ok(module) => module,
        Err(err) => panic!("parse failed: {err}\nsource:\n{source}"),
    };
    let rebuilt = module.reconstruct(source);
    if rebuilt != source {
        let changeset = Changeset::new(source, &rebuilt, "\n");
        let drift: String = changeset
            .diffs
            .iter()
            .map(|d| match d {
                Difference::Same(s) => format!("  {}\n", s.lines().join("\n  ")),
                Difference::Add(s) => format!("+ {}\n", s.lines().join("\n+ ")),
                Difference::Rem(s) => format!("- {}\n", s.lines().join("\n- ")),
            })
            .collect();
        panic!("reconstruction drifted:\n{drift}");
    }
}

#[test]
fn plain_statements() {
    assert_roundtrip("x = 1\ny = 2\n");
    assert_roundtrip("import os\nfrom typing import List\n");
}

#[test]
fn simple_functions() {
    assert_roundtrip("def f():\n    pass\n");
    assert_roundtrip("def f(a, b=2, *args, **kwargs):\n    return a\n");
    assert_roundtrip("async def f(x):\n    await x\n");
}

#[test]
fn classes_and_methods() {
    assert_roundtrip(
        "\
class A(Base, metaclass=Meta):
    attr = 1

    def m(self):
        return self.attr

    class Inner:
        pass
",
    );
}

#[test]
fn decorators() {
    assert_roundtrip("@dec\ndef f():\n    pass\n");
    assert_roundtrip("@app.route('/a/b', methods=['GET'])\n@auth\nclass H:\n    pass\n");
    assert_roundtrip("@first\n# comment between decorators\n@second\ndef f():\n    pass\n");
}

#[test]
fn multi_line_headers() {
    assert_roundtrip(
        "\
def long_name(first_argument,
              second_argument=17,
              *rest):
    return first_argument
",
    );
    assert_roundtrip("def f(a,\n      b):\n    # comment\n    return (a +\n            b)\n");
}

#[test]
fn string_literals() {
    assert_roundtrip("s = 'single'\nt = \"double\"\n");
    assert_roundtrip("s = '''triple\nwith \"quotes\" and # hash\n'''\n");
    assert_roundtrip("s = r'raw\\path'\nb = rb'\\x00'\nf_ = f'{x!r}'\n");
    assert_roundtrip("s = 'escaped \\' quote'\n");
    assert_roundtrip("def f(sep=':', end='\\n'):\n    print(sep, end=end)\n");
}

#[test]
fn comments_and_blanks() {
    assert_roundtrip("# leading\n\n\ndef f():  # trailing\n    # inner\n    pass\n\n# coda\n");
}

#[test]
fn continuations() {
    assert_roundtrip("total = 1 + \\\n    2\n");
    assert_roundtrip("values = [\n    1,\n    2,\n]\n");
    assert_roundtrip("d = {\n    'k': (1, 2),\n}\n");
}

#[test]
fn compact_and_nested_defs() {
    assert_roundtrip("def f(): return 1\n");
    assert_roundtrip(
        "\
def outer(a):
    def inner(b):
        return b
    if a:
        def conditional():
            pass
    return inner
",
    );
}

#[test]
fn missing_trailing_newline() {
    assert_roundtrip("def f():\n    pass");
    assert_roundtrip("x = 1");
}

#[test]
fn annotated_sources() {
    assert_roundtrip("def f(a: int, b: 'List[str]' = None) -> bool:\n    return bool(a)\n");
    assert_roundtrip("def f(a):\n    # type: (int) -> int\n    return a\n");
}

#[test]
fn indentation_styles() {
    assert_roundtrip("def f():\n\treturn 1\n");
    assert_roundtrip("if True:\n  def g():\n        pass\n");
}

#[test]
fn realistic_file() {
    assert_roundtrip(
        "\
#!/usr/bin/env python
\"\"\"Module docstring.

Spans multiple lines.
\"\"\"
from __future__ import annotations

import sys

CONSTANT = {'a': 1}


def main(argv=None):
    \"\"\"Entry point.\"\"\"
    if argv is None:
        argv = sys.argv[1:]
    for arg in argv:
        print(arg)
    return 0


class Runner:

    retries = 3

    def __init__(self, name):
        self.name = name

    @property
    def label(self):
        return f'runner:{self.name}'


if __name__ == '__main__':
    sys.exit(main())
",
    );
}
