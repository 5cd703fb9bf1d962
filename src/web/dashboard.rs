// src/web/dashboard.rs
// Embedded admin dashboard (single static page, talks to /api/*)

use axum::response::{Html, IntoResponse};

pub async fn dashboard() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>mesbot dashboard</title>
<style>
  body { font-family: ui-sans-serif, system-ui, sans-serif; margin: 0; background: #0f1115; color: #e6e6e6; }
  header { padding: 16px 24px; background: #161a22; border-bottom: 1px solid #262b36; }
  h1 { font-size: 18px; margin: 0; }
  main { padding: 24px; display: grid; gap: 24px; max-width: 1100px; margin: 0 auto; }
  section { background: #161a22; border: 1px solid #262b36; border-radius: 8px; padding: 16px; }
  h2 { font-size: 14px; margin: 0 0 12px; color: #9aa4b2; text-transform: uppercase; letter-spacing: .06em; }
  .kpis { display: grid; grid-template-columns: repeat(auto-fit, minmax(140px, 1fr)); gap: 12px; }
  .kpi { background: #0f1115; border-radius: 6px; padding: 12px; }
  .kpi .value { font-size: 22px; font-weight: 600; }
  .kpi .label { font-size: 12px; color: #9aa4b2; }
  table { width: 100%; border-collapse: collapse; font-size: 13px; }
  th, td { text-align: left; padding: 6px 8px; border-bottom: 1px solid #262b36; }
  th { color: #9aa4b2; font-weight: 500; }
  button { background: #2b6cb0; color: white; border: 0; border-radius: 4px; padding: 4px 10px; cursor: pointer; }
  button.danger { background: #b03030; }
  input { background: #0f1115; color: #e6e6e6; border: 1px solid #262b36; border-radius: 4px; padding: 4px 8px; width: 100%; box-sizing: border-box; }
  .env-row { display: grid; grid-template-columns: 240px 1fr; gap: 8px; margin-bottom: 6px; align-items: center; }
  .muted { color: #9aa4b2; font-size: 12px; }
</style>
</head>
<body>
<header><h1>mesbot</h1></header>
<main>
  <section>
    <h2>Overview</h2>
    <div class="kpis" id="kpis"></div>
  </section>
  <section>
    <h2>Users</h2>
    <table id="users"><thead><tr><th>ID</th><th>Name</th><th>Admin</th><th>Blocked</th><th></th></tr></thead><tbody></tbody></table>
  </section>
  <section>
    <h2>Threads</h2>
    <table id="threads"><thead><tr><th>ID</th><th>Name</th><th>Group</th><th>Prefix</th><th>Enabled</th></tr></thead><tbody></tbody></table>
  </section>
  <section>
    <h2>Environment</h2>
    <div id="env"></div>
    <button id="save-env">Save</button>
    <span class="muted" id="env-status"></span>
  </section>
</main>
<script>
const $ = (sel) => document.querySelector(sel);

async function api(path, options) {
  const res = await fetch('/api' + path, options);
  if (!res.ok) throw new Error((await res.json()).error || res.statusText);
  return res.json();
}

function kpi(label, value) {
  return `<div class="kpi"><div class="value">${value}</div><div class="label">${label}</div></div>`;
}

async function refreshOverview() {
  const o = await api('/overview');
  $('#kpis').innerHTML = [
    kpi('uptime (s)', o.uptime),
    kpi('events in', o.events.received),
    kpi('deduped', o.events.deduplicated),
    kpi('dropped', o.events.dropped),
    kpi('sent', o.messaging.sent),
    kpi('handler errors', o.errors.handler),
    kpi('active handlers', o.handlersActive),
    kpi('messages stored', o.store.messages),
  ].join('');
}

async function refreshUsers() {
  const { users } = await api('/users?limit=50');
  $('#users tbody').innerHTML = users.map(u => `
    <tr>
      <td>${u.id}</td><td>${u.name ?? ''}</td>
      <td>${u.isAdmin ? 'yes' : ''}</td><td>${u.isBlocked ? 'yes' : ''}</td>
      <td><button class="${u.isBlocked ? '' : 'danger'}" onclick="toggleBlock('${u.id}', ${!u.isBlocked})">
        ${u.isBlocked ? 'unblock' : 'block'}</button></td>
    </tr>`).join('');
}

async function toggleBlock(id, blocked) {
  await api(`/users/${id}/block`, {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify({ blocked }),
  });
  refreshUsers();
}

async function refreshThreads() {
  const { threads } = await api('/threads?limit=50');
  $('#threads tbody').innerHTML = threads.map(t => `
    <tr><td>${t.id}</td><td>${t.name ?? ''}</td><td>${t.isGroup ? 'yes' : ''}</td>
    <td>${t.prefix}</td><td>${t.enabled ? 'yes' : 'no'}</td></tr>`).join('');
}

async function refreshEnv() {
  const { env } = await api('/env');
  $('#env').innerHTML = Object.entries(env).map(([k, v]) =>
    `<div class="env-row"><label>${k}</label><input data-key="${k}" value="${v}"></div>`).join('');
}

$('#save-env').addEventListener('click', async () => {
  const updates = {};
  document.querySelectorAll('#env input').forEach(el => { updates[el.dataset.key] = el.value; });
  const { applied } = await api('/env', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify(updates),
  });
  $('#env-status').textContent = `applied: ${applied.join(', ') || 'nothing'}`;
});

refreshOverview(); refreshUsers(); refreshThreads(); refreshEnv();
setInterval(refreshOverview, 5000);
</script>
</body>
</html>
"#;
