//! Out-of-process VHD chain coalesce worker. Reads a single `MergeRequest`
//! as JSON from stdin, performs the merge, and writes a single
//! `MergeResponse` as JSON to stdout. One request per process invocation —
//! the daemon spawns a fresh worker per merge (§5, A7).

use std::io::Read;

use xenbakd_core::vhd::{MergeRequest, MergeResponse, SimpleVhdBackend, VhdBackend};

#[tokio::main]
async fn main() {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        print_response(MergeResponse {
            ok: false,
            error: Some(format!("failed to read request from stdin: {e}")),
        });
        std::process::exit(1);
    }

    let request: MergeRequest = match serde_json::from_str(&input) {
        Ok(r) => r,
        Err(e) => {
            print_response(MergeResponse {
                ok: false,
                error: Some(format!("malformed merge request: {e}")),
            });
            std::process::exit(1);
        }
    };

    let backend = SimpleVhdBackend::new();
    match backend.merge(&request.parent_path, &request.child_path).await {
        Ok(()) => {
            print_response(MergeResponse { ok: true, error: None });
        }
        Err(e) => {
            print_response(MergeResponse {
                ok: false,
                error: Some(e.to_string()),
            });
            std::process::exit(1);
        }
    }
}

fn print_response(response: MergeResponse) {
    match serde_json::to_string(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize merge response: {e}"),
    }
}
