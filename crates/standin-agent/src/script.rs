//! Init script injected into every document the agent opens.
//!
//! Defines the read-only identity flag so the beacon script exits before it
//! starts emitting, and tags `fetch`/`XMLHttpRequest`/`sendBeacon` traffic.
//! Header tagging at the network layer (`Network.setExtraHTTPHeaders`) is
//! applied separately; this script covers requests that bypass it.

use standin_core::identity::{IDENTITY_FLAG, SELF_ORIGIN_HEADER, SELF_ORIGIN_HEADER_VALUE};

pub fn identity_script() -> String {
    format!(
        r#"(() => {{
  Object.defineProperty(window, '{flag}', {{ value: true, writable: false, configurable: false }});

  const originalFetch = window.fetch;
  window.fetch = function (input, init) {{
    const opts = Object.assign({{}}, init);
    const headers = new Headers(opts.headers || (input instanceof Request ? input.headers : undefined));
    headers.set('{header}', '{value}');
    opts.headers = headers;
    return originalFetch.call(this, input, opts);
  }};

  const originalOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (...args) {{
    const result = originalOpen.apply(this, args);
    this.setRequestHeader('{header}', '{value}');
    return result;
  }};

  if (navigator.sendBeacon) {{
    // sendBeacon cannot carry headers; route it through tagged fetch.
    navigator.sendBeacon = function (url, data) {{
      window.fetch(url, {{ method: 'POST', body: data, keepalive: true }}).catch(() => {{}});
      return true;
    }};
  }}
}})();"#,
        flag = IDENTITY_FLAG,
        header = SELF_ORIGIN_HEADER,
        value = SELF_ORIGIN_HEADER_VALUE,
    )
}
