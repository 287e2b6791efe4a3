use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use wui::content::embedded_url;
use wui::protocol::RequestKind;
use wui::resources::PackedResource;
use wui::{
    BridgeConfig, BridgeController, BridgeError, ClassBuilder, ContentSource, NativeObject,
    ObjectScope, QuickJsHost, ResourceTable, VirtualProtocolHandler,
};

const INDEX: &[u8] = b"<html><head><script src=\"app.js\"></script></head><body>hi</body></html>";

static PAGES: &[PackedResource] = &[
    ("index.html", INDEX, "text/html", true),
    ("app.js", b"var loaded = 'yes';", "application/javascript", true),
    ("second.html", b"<html><script>var page = 2;</script></html>", "text/html", true),
    ("img/logo.png", b"\x89PNG\r\n\x1a\n\x00\x00", "image/png", false),
    (
        "gallery.html",
        b"<html><head><link rel=\"stylesheet\" href=\"missing.css\"></head>\
<body><img src=\"img/logo.png\"><img src=\"img/missing.png\"><script>var shown = 1;</script></body></html>",
        "text/html",
        true,
    ),
];

fn table() -> Arc<ResourceTable> {
    Arc::new(ResourceTable::from_static(PAGES).expect("table"))
}

fn controller(config: BridgeConfig) -> BridgeController<QuickJsHost> {
    let host = QuickJsHost::with_config(&config);
    let mut controller = BridgeController::new(host, config).expect("controller");
    controller
        .set_content_source(ContentSource::Embedded(table()))
        .expect("content source");
    controller
}

#[test]
fn scenario_a_embedded_markup_is_served_byte_exact() {
    let handler = VirtualProtocolHandler::new(table());
    let response = handler
        .respond(&embedded_url("index.html"), RequestKind::Primary)
        .expect("index");
    assert_eq!(response.body, INDEX);
    assert_eq!(response.mime_type, "text/html");

    for chunk in [1usize, 2, 5, 1024] {
        let mut stream = handler
            .open("embedded://app/img/logo.png", RequestKind::Secondary)
            .expect("logo");
        let mut body = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let read = stream.read(&mut buf);
            if read == 0 {
                break;
            }
            body.extend_from_slice(&buf[..read]);
        }
        assert_eq!(body, b"\x89PNG\r\n\x1a\n\x00\x00");
        assert_eq!(stream.mime_type(), "image/png");
        assert_eq!(stream.read(&mut buf), 0);
    }
}

#[test]
fn scenario_b_script_calls_native_log() {
    let mut controller = controller(BridgeConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller
        .add_object(
            NativeObject::new("console")
                .expect("console")
                .function("log", move |text: String| {
                    sink.lock().expect("lock").push(text);
                }),
            ObjectScope::Persistent,
        )
        .expect("add console");

    controller.go("index.html").expect("go");
    controller.pump();
    assert!(controller.is_loaded());

    let result = controller
        .try_eval("console.log('hello'); loaded")
        .expect("eval");
    assert_eq!(result, "yes");
    assert_eq!(*seen.lock().expect("lock"), vec![String::from("hello")]);

    assert_eq!(
        controller
            .invoke("console", "log", &[String::from("direct")])
            .expect("invoke"),
        ""
    );
    assert!(matches!(
        controller.invoke("console", "warn", &[]),
        Err(BridgeError::UnknownOperation { .. })
    ));
    let thrown = controller
        .try_eval("try { window.__wui_console__.invoke('warn', []); 'no' } catch (e) { 'caught' }")
        .expect("eval");
    assert_eq!(thrown, "caught");
}

#[derive(Debug, Default)]
struct Point {
    x: i32,
    label: String,
}

#[test]
fn scenario_c_property_reads_current_native_value() {
    let mut controller = controller(BridgeConfig::default());
    let descriptor = Arc::new(
        ClassBuilder::<Point>::new("Point")
            .expect("builder")
            .property("x", |p| p.x, |p, v| p.x = v)
            .property("label", |p| p.label.clone(), |p, v| p.label = v)
            .method("scale", |p: &mut Point, by: i32| {
                p.x *= by;
                p.x
            })
            .end()
            .expect("descriptor"),
    );
    let point = Arc::new(Mutex::new(Point::default()));
    controller
        .set_object(&descriptor, "pt", Arc::clone(&point), ObjectScope::Persistent)
        .expect("set object");

    controller.go("index.html").expect("go");
    controller.pump();

    point.lock().expect("lock").x = 7;
    assert_eq!(controller.try_eval("pt.x + 1").expect("read"), "8");

    controller.try_eval("pt.x = 3; pt.label = 'it\\'s'").expect("write");
    {
        let point = point.lock().expect("lock");
        assert_eq!(point.x, 3);
        assert_eq!(point.label, "it's");
    }
    assert_eq!(controller.try_eval("pt.scale(5)").expect("scale"), "15");
    assert_eq!(controller.try_eval("typeof pt.x").expect("type"), "number");
}

#[test]
fn scenario_d_rapid_navigation_loads_once() {
    let mut controller = controller(BridgeConfig::default());
    let loads = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&loads);
    controller.on_load(move |_, path| sink.borrow_mut().push(path.to_string()));

    controller.go("index.html").expect("first");
    controller.go("second.html").expect("second");
    controller.pump();

    assert_eq!(*loads.borrow(), vec![String::from("second.html")]);
    assert_eq!(controller.try_eval("page").expect("eval"), "2");
}

#[test]
fn missing_primary_document_fails_navigation_only() {
    let mut controller = controller(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    controller.on_error(move |err| sink.borrow_mut().push(err.clone()));

    controller.go("nowhere.html").expect("go");
    controller.pump();
    assert!(!controller.is_loaded());
    assert_eq!(
        *errors.borrow(),
        vec![BridgeError::ResourceNotFound {
            path: "nowhere.html".into()
        }]
    );

    controller.go("index.html").expect("go");
    controller.pump();
    assert!(controller.is_loaded());
}

#[test]
fn page_objects_are_rebound_only_while_registered() {
    let mut controller = controller(BridgeConfig::default());
    controller.on_load(|controller, path| {
        if path == "index.html" {
            controller
                .add_object(
                    NativeObject::new("pageOnly")
                        .expect("object")
                        .function("ping", || String::from("pong")),
                    ObjectScope::Page,
                )
                .expect("add");
        }
    });

    controller.go("index.html").expect("go");
    controller.pump();
    assert_eq!(controller.try_eval("pageOnly.ping()").expect("ping"), "pong");

    controller.go("second.html").expect("go");
    controller.pump();
    assert_eq!(
        controller.try_eval("typeof pageOnly").expect("typeof"),
        "undefined"
    );
}

#[test]
fn script_errors_are_not_fatal() {
    let mut controller = controller(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&errors);
    controller.on_error(move |_| *counter.borrow_mut() += 1);

    controller.go("index.html").expect("go");
    controller.pump();
    controller.eval("throw new Error('nope')");
    assert_eq!(*errors.borrow(), 1);
    assert_eq!(controller.try_eval("1 + 1").expect("still usable"), "2");
}

#[test]
fn marshalled_sequences_and_json_cross_the_boundary() {
    let mut controller = controller(BridgeConfig::default());
    controller
        .add_object(
            NativeObject::new("data")
                .expect("object")
                .function("sum", |values: Vec<i64>| values.iter().sum::<i64>())
                .function("words", |text: String| {
                    text.split_whitespace().map(str::to_string).collect::<Vec<_>>()
                })
                .function("flip", |flag: bool| !flag)
                .function("echo", |value: serde_json::Value| value),
            ObjectScope::Persistent,
        )
        .expect("add");
    controller.go("index.html").expect("go");
    controller.pump();

    assert_eq!(controller.try_eval("data.sum([1, 2, 39])").expect("sum"), "42");
    assert_eq!(
        controller
            .try_eval("data.words('a b  c').join('|')")
            .expect("words"),
        "a|b|c"
    );
    assert_eq!(controller.try_eval("data.words('').length").expect("empty"), "0");
    assert_eq!(controller.try_eval("data.flip(false) === true").expect("flip"), "true");
    assert_eq!(
        controller
            .try_eval("data.echo({ a: [1, 'x'] }).a[1]")
            .expect("json"),
        "x"
    );
}

#[test]
fn objects_registered_before_first_load_stay_registered() {
    let mut controller = controller(BridgeConfig::default());
    controller
        .add_object(
            NativeObject::new("early")
                .expect("object")
                .function("ping", || String::from("pong")),
            ObjectScope::default(),
        )
        .expect("add");

    controller.go("index.html").expect("go");
    controller.pump();
    assert_eq!(controller.try_eval("early.ping()").expect("first page"), "pong");

    controller.go("second.html").expect("go");
    controller.pump();
    assert_eq!(controller.try_eval("early.ping()").expect("second page"), "pong");
}

#[test]
fn exposed_names_stay_out_of_alias_namespace() {
    assert!(matches!(
        NativeObject::new("__wui_a__"),
        Err(BridgeError::InvalidName(_))
    ));

    let mut controller = controller(BridgeConfig::default());
    controller
        .add_object(
            NativeObject::new("a")
                .expect("object")
                .function("who", || String::from("A")),
            ObjectScope::Persistent,
        )
        .expect("add");
    controller.go("index.html").expect("go");
    controller.pump();
    assert_eq!(controller.try_eval("a.who()").expect("proxy"), "A");
    assert_eq!(
        controller
            .try_eval("window.__wui_a__.invoke('who', [])")
            .expect("alias"),
        "A"
    );
}

#[test]
fn missing_page_assets_are_reported_without_aborting() {
    let mut controller = controller(BridgeConfig::default());
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    controller.on_error(move |err| sink.borrow_mut().push(err.clone()));
    let loads = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&loads);
    controller.on_load(move |_, _| *counter.borrow_mut() += 1);

    controller.go("gallery.html").expect("go");
    controller.pump();

    assert!(controller.is_loaded());
    assert_eq!(*loads.borrow(), 1);
    assert_eq!(
        *errors.borrow(),
        vec![
            BridgeError::ResourceNotFound {
                path: "missing.css".into()
            },
            BridgeError::ResourceNotFound {
                path: "img/missing.png".into()
            },
        ]
    );
    assert_eq!(controller.try_eval("shown").expect("eval"), "1");
}
