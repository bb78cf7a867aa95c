use rama::{
    Layer as _, Service as _,
    error::{BoxError, ErrorContext as _, extra::OpaqueError},
    http::{
        Request, Response,
        client::EasyHttpWebClient,
        layer::{
            map_request_body::MapRequestBodyLayer, map_response_body::MapResponseBodyLayer,
        },
    },
    layer::MapErrLayer,
    rt::Executor,
    service::BoxService,
};

/// Client used to generate load against the target.
///
/// No retries and no client side timeout: every attempt is a sample
/// and the worker pool enforces the per request deadline itself.
pub fn new_load_client(
    keep_alive: bool,
) -> Result<BoxService<Request, Response, OpaqueError>, BoxError> {
    let connector = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(Executor::default());

    let middleware = (
        MapResponseBodyLayer::new_boxed_streaming_body(),
        MapErrLayer::into_opaque_error(),
        MapRequestBodyLayer::new_boxed_streaming_body(),
    );

    if keep_alive {
        let client = connector
            .try_with_default_connection_pool()
            .context("create connection pool for load client")?
            .build_client();
        Ok(middleware.into_layer(client).boxed())
    } else {
        Ok(middleware.into_layer(connector.build_client()).boxed())
    }
}
