use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tworld_fee_crawler::extract::{parse_amount, RecordExtractor};
use tworld_fee_crawler::layout::StructureDetector;
use tworld_fee_crawler::scraper::LoadedPage;

const URL: &str = "https://m.shop.tworld.co.kr/notice?prodId=NA00007790&prodNm=5GX+%ED%94%84%EB%9D%BC%EC%9E%84";

/// Disclosure table with `rows` devices, every tenth row unpriced
fn synthetic_table(rows: usize) -> String {
    let mut html = String::from(
        "<html><body><div class=\"cont-area\"><table class=\"disclosure-list\">\
         <thead><tr><th>상품명</th><th>공시지원금</th><th>추가지원금</th></tr></thead><tbody>",
    );
    for i in 0..rows {
        if i % 10 == 9 {
            html.push_str(&format!("<tr><td>단말기 {}</td><td>문의</td><td>-</td></tr>", i));
        } else {
            let public = 100_000 + i * 1_000;
            html.push_str(&format!(
                "<tr><td>단말기 {}</td><td>{},{:03}원</td><td>{},{:03}원</td></tr>",
                i,
                public / 1000,
                public % 1000,
                public * 15 / 100 / 1000,
                public * 15 / 100 % 1000
            ));
        }
    }
    html.push_str("</tbody></table></div></body></html>");
    html
}

fn bench_extraction(c: &mut Criterion) {
    let detector = StructureDetector::new().expect("built-in layouts");
    let extractor = RecordExtractor::new();
    let page = LoadedPage::from_html(URL, synthetic_table(200));

    c.bench_function("detect_table_200", |b| {
        b.iter(|| {
            let detected = detector.detect(black_box(&page)).expect("table layout");
            black_box(detected.layout.len())
        })
    });

    c.bench_function("detect_and_extract_table_200", |b| {
        b.iter(|| {
            let detected = detector.detect(black_box(&page)).expect("table layout");
            let extraction = extractor
                .extract(&detected, chrono::Local::now())
                .expect("records");
            black_box(extraction.records.len())
        })
    });

    c.bench_function("parse_amount", |b| {
        b.iter(|| {
            for raw in ["516,000원", "645 400", "1'161'400", "공시지원금 0원"] {
                let _ = black_box(parse_amount(black_box(raw)));
            }
        })
    });
}

criterion_group!(benches, bench_extraction);
criterion_main!(benches);
