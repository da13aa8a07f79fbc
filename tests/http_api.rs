use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dmsync::api::{
    ConversationResponse, HttpInboxApi, InboxApi, InboxResponse, MessagePage, MessageResponse,
    SendMessageRequest, StartConversationRequest,
};
use dmsync::chat::{
    Attachment, AttachmentKind, AttachmentUpload, Conversation, ConversationId, Message, MessageId,
};
use dmsync::entity::{UserId, UserRef};
use dmsync::error::ApiError;
use dmsync::presence::NoPresence;
use dmsync::scheduler::PollIntervals;
use dmsync::{DmPanel, SendOutcome};
use tokio::task::JoinHandle;

const TOKEN: &str = "test-token";

fn conversation(id: &str) -> Conversation {
    Conversation::new(id, UserRef::new("me", "Me"), UserRef::new("bob", "Bob"))
}

fn message(id: &str, conversation: &str, text: Option<String>) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation),
        sender_id: UserId::new("me"),
        recipient_id: UserId::new("bob"),
        text,
        attachments: Vec::new(),
        created_at: Utc::now(),
        read_at: None,
    }
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED.into_response()),
    }
}

async fn inbox(headers: HeaderMap) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    Json(InboxResponse {
        conversations: vec![conversation("c1"), conversation("c2")],
    })
    .into_response()
}

async fn list_messages(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    if id == "broken" {
        return (StatusCode::OK, "not json").into_response();
    }
    Json(MessagePage {
        conversation: conversation(&id),
        messages: vec![message("m1", &id, Some("first".into()))],
    })
    .into_response()
}

async fn start_peer(
    headers: HeaderMap,
    Path(community): Path<String>,
    Json(body): Json<StartConversationRequest>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let conv = Conversation::new(
        format!("{}-{}", community, body.target_user_id),
        UserRef::new("me", "Me"),
        UserRef::new(body.target_user_id.as_str(), "Target"),
    );
    Json(ConversationResponse { conversation: conv }).into_response()
}

async fn send_message(
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    Json(MessageResponse {
        message: message("m2", &id, Some(body.text)),
    })
    .into_response()
}

async fn upload(headers: HeaderMap, Path(id): Path<String>, mut form: Multipart) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let Ok(Some(field)) = form.next_field().await else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let name = field.file_name().unwrap_or("unnamed").to_string();
    let kind = match field.content_type() {
        Some(ct) if ct.starts_with("image/") => AttachmentKind::Image,
        Some(ct) if ct.starts_with("video/") => AttachmentKind::Video,
        _ => AttachmentKind::File,
    };
    let Ok(bytes) = field.bytes().await else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut msg = message("m3", &id, None);
    msg.attachments.push(Attachment {
        kind,
        url: format!("https://cdn.test/{}/{}", bytes.len(), name),
        caption: Some(name),
    });
    Json(MessageResponse { message: msg }).into_response()
}

async fn mark_read(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    if id == "missing" {
        return (StatusCode::NOT_FOUND, "no such conversation").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn spawn_server() -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new()
        .route("/dm/inbox", get(inbox))
        .route(
            "/dm/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/dm/conversations/:id/attachments", post(upload))
        .route("/dm/conversations/:id/read", post(mark_read))
        .route("/communities/:community/dm/peer", post(start_peer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

fn client(addr: SocketAddr, token: Option<&str>) -> HttpInboxApi {
    HttpInboxApi::new(
        format!("http://{}/", addr),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn reads_inbox_and_messages() {
    let (addr, server) = spawn_server().await;
    let api = client(addr, Some(TOKEN));

    let conversations = api.list_inbox().await.unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id.as_str(), "c1");

    let page = api.list_messages(&"c1".into()).await.unwrap();
    assert_eq!(page.conversation.id.as_str(), "c1");
    assert_eq!(page.messages[0].text.as_deref(), Some("first"));

    server.abort();
}

#[tokio::test]
async fn writes_go_to_the_right_endpoints() {
    let (addr, server) = spawn_server().await;
    let api = client(addr, Some(TOKEN));

    let sent = api.send_message(&"c1".into(), "hello").await.unwrap();
    assert_eq!(sent.id.as_str(), "m2");
    assert_eq!(sent.text.as_deref(), Some("hello"));

    let uploaded = api
        .upload_attachment(
            &"c1".into(),
            AttachmentUpload::new("clip.mp4", "video/mp4", vec![0u8; 16]),
        )
        .await
        .unwrap();
    assert_eq!(uploaded.attachments[0].kind, AttachmentKind::Video);
    assert_eq!(uploaded.attachments[0].url, "https://cdn.test/16/clip.mp4");

    let started = api
        .start_peer_conversation("guild", &"carol".into())
        .await
        .unwrap();
    assert_eq!(started.id.as_str(), "guild-carol");

    api.mark_read(&"c1".into()).await.unwrap();

    server.abort();
}

#[tokio::test]
async fn maps_failures_to_api_errors() {
    let (addr, server) = spawn_server().await;

    let anonymous = client(addr, None);
    match anonymous.list_inbox().await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {:?}", other),
    }

    let api = client(addr, Some(TOKEN));
    match api.mark_read(&"missing".into()).await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such conversation");
        }
        other => panic!("expected 404, got {:?}", other),
    }
    assert!(matches!(
        api.list_messages(&"broken".into()).await,
        Err(ApiError::Decode(_))
    ));

    server.abort();

    let unreachable = client(addr, Some(TOKEN));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        unreachable.list_inbox().await,
        Err(ApiError::Http(_))
    ));
}

#[tokio::test]
async fn panel_runs_over_http() {
    let (addr, server) = spawn_server().await;
    let panel = DmPanel::new(
        UserId::new("me"),
        Arc::new(client(addr, Some(TOKEN))),
        Arc::new(NoPresence),
        PollIntervals::default(),
    );

    panel.open().await;
    assert_eq!(panel.snapshot().conversations.len(), 2);
    panel.select_conversation("c1".into()).await;
    assert_eq!(panel.send("over the wire").await, SendOutcome::Confirmed("m2".into()));

    let ids: Vec<String> = panel
        .snapshot()
        .messages
        .iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    panel.close();
    server.abort();
}
