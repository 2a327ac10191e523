use boring::pkey::PKey;
use boring::ssl::{AlpnError, SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::X509;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use mimic::ClientHelloInfo;

/// Generate a self-signed certificate for 127.0.0.1 and return SslAcceptorBuilder + CA cert bytes.
pub fn generate_cert_bundle() -> (SslAcceptorBuilder, Vec<u8>) {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];

    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");

    // self-signed, so the leaf doubles as the CA
    (builder, cert_pem.into_bytes())
}

/// Acceptor that selects from `protos` (ALPN wire format, e.g. `b"\x02h2"`).
pub fn acceptor_with_alpn(protos: &'static [u8]) -> (SslAcceptor, Vec<u8>) {
    let (mut builder, ca) = generate_cert_bundle();
    builder.set_alpn_select_callback(move |_, client_protos| {
        boring::ssl::select_next_proto(protos, client_protos).ok_or(AlpnError::NOACK)
    });
    (builder.build(), ca)
}

/// Listener that records the first TLS record of one connection and then
/// hangs up without answering.
pub struct ClientHelloCapture {
    listener: TcpListener,
    port: u16,
}

impl ClientHelloCapture {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn url(&self) -> String {
        format!("https://127.0.0.1:{}/", self.port)
    }

    pub fn start(self) -> tokio::task::JoinHandle<(Vec<u8>, ClientHelloInfo)> {
        tokio::spawn(async move {
            let (mut stream, _) = self.listener.accept().await.expect("accept");
            let mut header = [0u8; 5];
            stream.read_exact(&mut header).await.expect("record header");
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;
            let mut record = header.to_vec();
            record.resize(5 + len, 0);
            stream.read_exact(&mut record[5..]).await.expect("record body");
            let info = ClientHelloInfo::parse_record(&record).expect("ClientHello");
            (record, info)
        })
    }
}
