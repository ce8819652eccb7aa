use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use vulngraph_client::{
    ApiClient, ClientError, Filter, IterationError, PageFailure, PageId, PageRequest, PageSource,
    PagingSettings, Resource,
};
use vulngraph_types::VulnRecord;

#[derive(Debug, Deserialize)]
struct Row {
    n: u64,
}

/// Serves offset pages of two rows each; `None` entries answer with a 500.
struct Scripted {
    pages: Vec<Option<Vec<u64>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl Scripted {
    fn new(pages: Vec<Option<Vec<u64>>>) -> Self {
        Self {
            pages,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PageSource for Scripted {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        self.requests.lock().unwrap().push(request.clone());
        let offset: usize = request.param("offset").unwrap().parse().unwrap();
        let index = offset / 2;
        match self.pages.get(index) {
            Some(Some(rows)) => {
                let data: Vec<String> = rows.iter().map(|n| format!("{{\"n\":{n}}}")).collect();
                let body = format!(
                    "{{\"data\":[{}],\"hasMore\":{}}}",
                    data.join(","),
                    index + 1 < self.pages.len()
                );
                Ok(body.into_bytes())
            }
            Some(None) => Err(ClientError::Status {
                status: 500,
                body: "boom".into(),
            }),
            None => Ok(br#"{"data":[],"hasMore":false}"#.to_vec()),
        }
    }
}

fn five_pages() -> Vec<Option<Vec<u64>>> {
    (0..5).map(|p| Some(vec![p * 2, p * 2 + 1])).collect()
}

fn settings() -> PagingSettings {
    PagingSettings {
        page_size: 2,
        id_batch_size: 2,
        max_consecutive_failures: 3,
    }
}

#[tokio::test]
async fn handler_failure_without_error_callback_stops_iteration() {
    let client = ApiClient::new(Scripted::new(five_pages()), settings());
    let mut handled = 0;

    let result = client
        .iterate(
            Resource::Hosts,
            vec![],
            async |rows: Vec<Row>| {
                handled += 1;
                if rows[0].n == 4 {
                    Err("page three rejected".to_string())
                } else {
                    Ok(())
                }
            },
            None,
        )
        .await;

    let err = result.unwrap_err();
    match err {
        IterationError::Page { page, failure } => {
            assert_eq!(page.index, 2);
            assert!(matches!(failure, PageFailure::Handler(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(handled, 3);
    assert_eq!(client.source().request_count(), 3, "pages 4 and 5 must not be fetched");
}

#[tokio::test]
async fn handler_failure_with_error_callback_continues() {
    let client = ApiClient::new(Scripted::new(five_pages()), settings());
    let mut handled = 0;
    let mut reported: Vec<usize> = Vec::new();
    let mut on_error = |page: &PageId, _failure: &PageFailure<String>| reported.push(page.index);

    let summary = client
        .iterate(
            Resource::Hosts,
            vec![],
            async |rows: Vec<Row>| {
                handled += 1;
                if rows[0].n == 4 {
                    Err("page three rejected".to_string())
                } else {
                    Ok(())
                }
            },
            Some(&mut on_error),
        )
        .await
        .unwrap();

    assert_eq!(handled, 5);
    assert_eq!(summary.pages, 5);
    assert_eq!(summary.records, 10);
    assert_eq!(summary.page_errors, 1);
    assert!(!summary.gave_up);
    assert_eq!(reported, vec![2]);
}

#[tokio::test]
async fn failed_fetch_advances_to_next_page() {
    let mut pages = five_pages();
    pages[1] = None;
    let client = ApiClient::new(Scripted::new(pages), settings());
    let mut seen = Vec::new();
    let mut errors = 0;
    let mut on_error = |_: &PageId, failure: &PageFailure<String>| {
        assert!(matches!(failure, PageFailure::Fetch(_)));
        errors += 1;
    };

    let summary = client
        .iterate(
            Resource::Hosts,
            vec![],
            async |rows: Vec<Row>| {
                seen.extend(rows.iter().map(|r| r.n));
                Ok::<(), String>(())
            },
            Some(&mut on_error),
        )
        .await
        .unwrap();

    assert_eq!(errors, 1);
    assert_eq!(summary.pages, 5);
    assert_eq!(seen, vec![0, 1, 4, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn consecutive_failures_give_up_on_offset_resources() {
    let pages = vec![Some(vec![0, 1]), None, None, None, Some(vec![8, 9])];
    let client = ApiClient::new(Scripted::new(pages), settings());
    let mut pager = client.pages::<Row>(Resource::Hosts, vec![]).unwrap();

    let mut outcomes = Vec::new();
    while let Some(page) = pager.next_page().await {
        outcomes.push(page.records.is_ok());
    }

    assert_eq!(outcomes, vec![true, false, false, false]);
    assert!(pager.gave_up());

    pager.restart();
    assert!(!pager.gave_up());
    let first = pager.next_page().await.unwrap();
    assert_eq!(first.id.index, 0);
    assert_eq!(first.records.unwrap().len(), 2);
}

#[tokio::test]
async fn unsupported_filter_is_rejected_before_fetching() {
    let client = ApiClient::new(Scripted::new(five_pages()), settings());
    let result = client
        .iterate(
            Resource::Scans,
            vec![Filter::ScanRef("scan/1".into())],
            async |_rows: Vec<Row>| Ok::<(), String>(()),
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(IterationError::Request(ClientError::UnsupportedFilter { .. }))
    ));
    assert_eq!(client.source().request_count(), 0);
}

/// Answers knowledge-base batches, failing the batch that contains QID 3.
struct Catalog {
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl PageSource for Catalog {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        let ids = request.param("ids").unwrap().to_string();
        self.requests.lock().unwrap().push(ids.clone());
        let qids: Vec<u64> = ids.split(',').map(|s| s.parse().unwrap()).collect();
        if qids.contains(&3) {
            return Err(ClientError::Http("connection reset".into()));
        }
        let data: Vec<String> = qids
            .iter()
            .map(|q| format!("{{\"QID\":{q},\"TITLE\":\"vuln {q}\"}}"))
            .collect();
        Ok(format!("{{\"data\":[{}]}}", data.join(",")).into_bytes())
    }
}

#[tokio::test]
async fn id_filters_are_split_into_batches() {
    let client = ApiClient::new(
        Catalog {
            requests: Mutex::new(Vec::new()),
        },
        settings(),
    );
    let mut titles = Vec::new();
    let mut failed_ids = Vec::new();
    let mut on_error =
        |page: &PageId, _: &PageFailure<String>| failed_ids.extend_from_slice(page.ids());

    let summary = client
        .iterate(
            Resource::Vulnerabilities,
            vec![Filter::Ids(vec![1, 2, 3, 4, 5])],
            async |vulns: Vec<VulnRecord>| {
                titles.extend(vulns.into_iter().map(|v| v.title));
                Ok::<(), String>(())
            },
            Some(&mut on_error),
        )
        .await
        .unwrap();

    assert_eq!(
        *client.source().requests.lock().unwrap(),
        vec!["1,2".to_string(), "3,4".to_string(), "5".to_string()]
    );
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.page_errors, 1);
    assert_eq!(failed_ids, vec![3, 4]);
    assert_eq!(titles, vec!["vuln 1", "vuln 2", "vuln 5"]);
}
