use completion_api::{
    normalize_chat_url, ChatMessage, CompletionClient, CompletionConfig, CompletionRequest,
};

#[test]
fn http_request_targets_chat_function_with_bearer() {
    let config = CompletionConfig::new("publishable-key")
        .with_base_url("https://project.example.co");
    let client = CompletionClient::new(config).expect("client");
    let request = CompletionRequest::new(vec![
        ChatMessage::user("Hola"),
        ChatMessage::assistant("¿En qué puedo ayudarte?"),
        ChatMessage::user("Quiero organizar mi semana"),
    ]);

    let http_request = client
        .build_request(&request)
        .expect("build request")
        .build()
        .expect("request");

    assert_eq!(
        http_request.url().as_str(),
        normalize_chat_url("https://project.example.co")
    );
    assert_eq!(http_request.method(), "POST");
    assert_eq!(
        http_request.headers()["authorization"],
        "Bearer publishable-key"
    );
    assert_eq!(http_request.headers()["accept"], "text/event-stream");

    let body = http_request
        .body()
        .and_then(|body| body.as_bytes())
        .expect("json body is buffered");
    let json: serde_json::Value = serde_json::from_slice(body).expect("body is json");
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["messages"][1]["role"], "assistant");
    assert_eq!(json["messages"][2]["content"], "Quiero organizar mi semana");
}

#[test]
fn http_request_without_key_fails_before_sending() {
    let client = CompletionClient::new(CompletionConfig::default()).expect("client");
    let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
    assert!(client.build_request(&request).is_err());
}
