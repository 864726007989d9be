use quietboard::sanitize::{Sanitizer, TRUNCATION_MARKER};

const HOSTILE: &[&str] = &[
    "<script>alert(1)</script>",
    "<SCRIPT SRC=//evil.example/x.js></SCRIPT>",
    "<img src=x onerror=alert(1)>",
    "<svg/onload=alert(1)>",
    "<a href=\"javascript:alert(1)\">click</a>",
    "<a href=\"JaVaScRiPt:alert(1)\">click</a>",
    "<a href=\"java\tscript:alert(1)\">click</a>",
    "<a href=\"&#106;avascript:alert(1)\">click</a>",
    "[click](javascript:alert(1))",
    "[click](data:text/html;base64,PHNjcmlwdD5hbGVydCgxKTwvc2NyaXB0Pg==)",
    "<a href=\"vbscript:msgbox(1)\">x</a>",
    "<iframe src=\"https://evil.example\"></iframe>",
    "<object data=\"x.swf\"></object><embed src=\"x.swf\">",
    "<form action=\"https://evil.example\"><input name=q></form>",
    "<p style=\"background:url(javascript:alert(1))\">x</p>",
    "<div onclick=\"alert(1)\">x</div>",
    "<math><mtext><table><mglyph><style><img src=x onerror=alert(1)>",
    "<noscript><p title=\"</noscript><img src=x onerror=alert(1)>\">",
    "<<script>script>alert(1)<</script>/script>",
    "<!-- <script>alert(1)</script> -->",
    "<meta http-equiv=\"refresh\" content=\"0;url=https://evil.example\">",
    "<base href=\"https://evil.example/\">",
    "<link rel=stylesheet href=\"https://evil.example/x.css\">",
];

fn assert_inert(html: &str, input: &str) {
    let lower = html.to_ascii_lowercase();
    for needle in ["<script", "<iframe", "<style", "<object", "<embed", "<form", "<img", "<svg", "<meta", "<base", "<link"] {
        assert!(!lower.contains(needle), "{needle} survived {input:?}: {html}");
    }
    for needle in ["javascript:", "vbscript:", "data:text"] {
        assert!(!lower.contains(needle), "{needle} survived {input:?}: {html}");
    }
    // text is escaped, so every raw '<' opens a real tag
    for tag in lower.split('<').skip(1) {
        let tag = tag.split('>').next().unwrap_or_default();
        assert!(!tag.contains(" on"), "handler attribute survived {input:?}: {html}");
        assert!(!tag.contains("style="), "style attribute survived {input:?}: {html}");
    }
}

#[test]
fn hostile_inputs_come_out_inert() {
    let s = Sanitizer::default();
    for input in HOSTILE {
        let html = s.sanitize(input).unwrap();
        assert_inert(html.as_str(), input);
    }
}

#[test]
fn hostile_inputs_are_stable_under_resanitizing() {
    let s = Sanitizer::default();
    for input in HOSTILE {
        let once = s.sanitize(input).unwrap();
        let twice = s.sanitize(once.as_str()).unwrap();
        assert_eq!(once, twice, "not idempotent for {input:?}");
    }
}

#[test]
fn ordinary_markdown_renders() {
    let s = Sanitizer::default();
    assert_eq!(s.sanitize("**bold** text").unwrap().as_str(), "<strong>bold</strong> text");
    assert_eq!(s.sanitize("line one\nline two").unwrap().as_str(), "line one<br>line two");

    let list = s.sanitize("- a\n- b").unwrap();
    assert!(list.as_str().starts_with("<ul>"));
    assert!(list.as_str().contains("<li>a</li>"));

    let code = s.sanitize("```\n<b>not bold</b>\n```").unwrap();
    assert!(code.as_str().contains("&lt;b&gt;not bold&lt;/b&gt;"));

    let link = s.sanitize("[docs](https://example.org/a?b=c)").unwrap();
    assert!(link.as_str().contains("href=\"https://example.org/a?b=c\""));
    assert!(link.as_str().contains("rel=\"noopener noreferrer nofollow\""));

    let mail = s.sanitize("[mail](mailto:op@example.org)").unwrap();
    assert!(mail.as_str().contains("href=\"mailto:op@example.org\""));
}

#[test]
fn entities_stay_escaped() {
    let s = Sanitizer::default();
    let html = s.sanitize("1 < 2 && 3 > 2").unwrap();
    assert_eq!(html.as_str(), "1 &lt; 2 &amp;&amp; 3 &gt; 2");
    assert_eq!(s.sanitize(html.as_str()).unwrap(), html);
}

#[test]
fn output_never_exceeds_the_cap() {
    let s = Sanitizer::new(32 * 1024, 512);
    let input = "**word** ".repeat(400);
    let html = s.sanitize(&input).unwrap();
    assert!(html.as_str().len() <= 512, "{} bytes", html.as_str().len());
    assert!(html.as_str().ends_with(TRUNCATION_MARKER));
    assert_eq!(html.as_str().matches("<strong>").count(), html.as_str().matches("</strong>").count());
}

#[test]
fn literal_markdown_characters_survive_resanitizing() {
    let s = Sanitizer::default();
    for input in [
        "\\*not emphasis\\*",
        "\\_also not\\_",
        "\\# not a heading",
        "2\\) not a list",
        "\\+ not a bullet",
        "\\`not code\\`",
        "a \\\\ backslash",
        "\\[text\\](https://example.org/x)",
        "quote `*` and `_` in code",
    ] {
        let once = s.sanitize(input).unwrap();
        let twice = s.sanitize(once.as_str()).unwrap();
        assert_eq!(once, twice, "not idempotent for {input:?}");
        let thrice = s.sanitize(twice.as_str()).unwrap();
        assert_eq!(twice, thrice);
        assert!(!once.as_str().contains("<em>") && !once.as_str().contains("<h1>"), "{input:?}: {once}");
    }
}
