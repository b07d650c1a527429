//! Framed TCP dialogue against a live listener.

mod common;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use common::seeded_store;
use tier3_daemon::protocol::{Dispatcher, PosFrameCodec};
use tier3_daemon::server;
use tier3_core::clock::FixedClock;
use tier3_core::engine::{EngineConfig, Tier3Engine};

use std::sync::Arc;

async fn start_server() -> (std::net::SocketAddr, tempfile::NamedTempFile) {
    let (store, guard) = seeded_store();
    let engine = Tier3Engine::new(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(FixedClock::on_date(2024, 6, 1)),
        EngineConfig::default(),
    );
    let dispatcher = Dispatcher::new(engine);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run(listener, dispatcher));
    (addr, guard)
}

const REWARDS_REQUEST: &str = "<GetRewardsRequest>\
    <RequestHeader><POSSequenceID>123</POSSequenceID>\
    <StoreLocationID>STORE-1</StoreLocationID></RequestHeader>\
    <LoyaltyID>5551239876</LoyaltyID>\
    <POSTransactionID>TXN-1001</POSTransactionID>\
    <AgeVerified value=\"verified\"></AgeVerified>\
    <TransactionLine><LineNumber>1</LineNumber>\
    <ItemLine><ItemCode><POSCode>002820000112</POSCode></ItemCode>\
    <SalesQuantity>1</SalesQuantity>\
    <RegularSellPrice>7.00</RegularSellPrice></ItemLine>\
    </TransactionLine></GetRewardsRequest>";

#[tokio::test]
async fn rewards_round_trip_over_tcp() {
    let (addr, _guard) = start_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PosFrameCodec::new());

    framed
        .send(REWARDS_REQUEST.as_bytes().to_vec())
        .await
        .unwrap();

    let response = framed.next().await.unwrap().unwrap();
    let xml = String::from_utf8(response.to_vec()).unwrap();
    assert!(xml.starts_with("<GetRewardsResponse>"));
    assert!(xml.contains("<POSSequenceID>123</POSSequenceID>"));
    assert!(xml.contains("<RewardValue>0.97</RewardValue>"));
    assert!(xml.contains("<AgeVerified value=\"yes\">"));
    assert!(xml.contains("LOYALTY SAVINGS        -$0.97"));
}

#[tokio::test]
async fn online_status_and_finalize_share_one_connection() {
    let (addr, _guard) = start_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PosFrameCodec::new());

    let status_request = "<GetLoyaltyOnlineStatusRequest>\
        <RequestHeader><POSSequenceID>7</POSSequenceID></RequestHeader>\
        </GetLoyaltyOnlineStatusRequest>";
    framed
        .send(status_request.as_bytes().to_vec())
        .await
        .unwrap();
    let response = framed.next().await.unwrap().unwrap();
    let xml = String::from_utf8(response.to_vec()).unwrap();
    assert!(xml.contains("<PromptForLoyaltyFlag value=\"yes\">"));

    let finalize = "<FinalizeRewardsRequest>\
        <LoyaltyOfflineFlag value=\"yes\"></LoyaltyOfflineFlag>\
        </FinalizeRewardsRequest>";
    framed.send(finalize.as_bytes().to_vec()).await.unwrap();
    let response = framed.next().await.unwrap().unwrap();
    assert_eq!(&response[..], &b"Not Found"[..]);
}

#[tokio::test]
async fn begin_customer_draws_no_response() {
    let (addr, _guard) = start_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, PosFrameCodec::new());

    framed
        .send(b"<BeginCustomerRequest></BeginCustomerRequest>".to_vec())
        .await
        .unwrap();
    // The next request on the same connection is answered, proving the
    // silent one did not wedge the dialogue.
    framed
        .send(
            b"<CancelTransactionRequest><RequestHeader>\
              <POSSequenceID>9</POSSequenceID></RequestHeader>\
              </CancelTransactionRequest>"
                .to_vec(),
        )
        .await
        .unwrap();

    let response = framed.next().await.unwrap().unwrap();
    let xml = String::from_utf8(response.to_vec()).unwrap();
    assert!(xml.starts_with("<CancelTransactionResponse>"));
    assert!(xml.contains("<POSSequenceID>9</POSSequenceID>"));
}
